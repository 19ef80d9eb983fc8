//! End-to-end runs against the simulated pulse counter

use pulsebench_core::core::plan::{counter_suite, CounterPlan, ScriptedCase, TestPlan};
use pulsebench_core::core::report::{ReportGenerator, Verdict};
use pulsebench_core::core::result::{RunCompletion, TestStatus};
use pulsebench_core::core::runner::{RunnerConfig, TestRunner};
use pulsebench_core::core::simulator::{DeviceReply, PulseCounter, VirtualDevice};
use pulsebench_core::core::testcase::TestCase;
use pulsebench_core::core::transcript::Transcript;
use std::time::Duration;

fn cases(cases: Vec<ScriptedCase>) -> Vec<Box<dyn TestCase>> {
    TestPlan { title: None, cases }.into_cases()
}

fn status_of(outcome: &pulsebench_core::RunOutcome, id: &str) -> TestStatus {
    outcome
        .report
        .results()
        .iter()
        .find(|r| r.id() == id)
        .map(|r| r.status())
        .unwrap_or_else(|| panic!("no result {id}"))
}

#[tokio::test(start_paused = true)]
async fn counter_suite_passes_on_healthy_device() {
    let plan = CounterPlan::default();
    let runner = TestRunner::new(RunnerConfig::default());
    let outcome = runner
        .run(Box::new(PulseCounter::device(plan.rate_hz)), &cases(counter_suite(&plan)))
        .await
        .unwrap();

    let report = &outcome.report;
    let ids: Vec<&str> = report.results().iter().map(|r| r.id()).collect();
    assert_eq!(
        ids,
        vec!["1.1", "1.2a", "1.2b", "1.3a", "1.3b", "1.4", "1.5a", "1.5b", "1.6a", "1.6b", "2.1a", "2.1b"]
    );
    for result in report.results() {
        assert_eq!(
            result.status(),
            TestStatus::Pass,
            "{} {}: expected {}, got {} ({})",
            result.id(),
            result.name(),
            result.expected(),
            result.actual(),
            result.notes()
        );
    }
    assert!(outcome.all_passed());
    assert_eq!(ReportGenerator::default().verdict(report), Verdict::Accepted);
}

#[tokio::test(start_paused = true)]
async fn basic_count_band_decides_pass_and_fail() {
    for (rate, expected) in [(5000.0, TestStatus::Pass), (4800.0, TestStatus::Pass), (5300.0, TestStatus::Fail)] {
        let plan = CounterPlan::default();
        let basic: Vec<ScriptedCase> = counter_suite(&plan).into_iter().take(1).collect();
        let runner = TestRunner::new(RunnerConfig::default());
        let outcome = runner
            .run(Box::new(PulseCounter::device(rate)), &cases(basic))
            .await
            .unwrap();
        assert_eq!(status_of(&outcome, "1.1"), expected, "signal at {rate} Hz");
    }
}

#[tokio::test(start_paused = true)]
async fn counter_that_ignores_stop_fails_stop_check() {
    let mut plan = CounterPlan::default();
    // The device only understands 4 as stop.
    plan.control.stop = 8;
    let first_two: Vec<ScriptedCase> = counter_suite(&plan).into_iter().take(2).collect();

    let runner = TestRunner::new(RunnerConfig::default());
    let outcome = runner
        .run(Box::new(PulseCounter::device(plan.rate_hz)), &cases(first_two))
        .await
        .unwrap();

    assert_eq!(status_of(&outcome, "1.1"), TestStatus::Pass);
    assert_eq!(status_of(&outcome, "1.2a"), TestStatus::Fail);
    assert_eq!(*outcome.completion(), RunCompletion::Completed);
}

#[tokio::test(start_paused = true)]
async fn silent_device_yields_inconclusive_not_fail() {
    let plan = CounterPlan::default();
    let basic: Vec<ScriptedCase> = counter_suite(&plan).into_iter().take(1).collect();
    let runner = TestRunner::new(RunnerConfig::default());
    let outcome = runner
        .run(Box::new(VirtualDevice::from_fn(|_| None)), &cases(basic))
        .await
        .unwrap();

    assert_eq!(status_of(&outcome, "1.1"), TestStatus::Inconclusive);
    assert_eq!(outcome.report.failed(), 0);
    assert!(!outcome.all_passed());
}

#[tokio::test(start_paused = true)]
async fn interrupted_run_still_renders_report() {
    let plan = CounterPlan::default();
    let runner = TestRunner::new(RunnerConfig::default());
    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        // Lands inside the stop test's five second hold.
        tokio::time::sleep(Duration::from_secs(17)).await;
        cancel.cancel();
    });

    let outcome = runner
        .run(Box::new(PulseCounter::device(plan.rate_hz)), &cases(counter_suite(&plan)))
        .await
        .unwrap();

    assert_eq!(*outcome.completion(), RunCompletion::Interrupted);
    assert_eq!(status_of(&outcome, "1.1"), TestStatus::Pass);
    assert_eq!(status_of(&outcome, "1.2"), TestStatus::Inconclusive);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.md");
    ReportGenerator::default().write(&outcome.report, &path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Run interrupted"));
    assert!(text.contains("### Test 1.1"));
    assert!(text.contains("**REJECTED**"));
}

#[tokio::test(start_paused = true)]
async fn interrupt_keeps_checks_already_made_in_the_case() {
    let plan = CounterPlan::default();
    let first_two: Vec<ScriptedCase> = counter_suite(&plan).into_iter().take(2).collect();
    let runner = TestRunner::new(RunnerConfig::default());
    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        // After the stop check, during the resume window.
        tokio::time::sleep(Duration::from_secs(23)).await;
        cancel.cancel();
    });

    let outcome = runner
        .run(Box::new(PulseCounter::device(plan.rate_hz)), &cases(first_two))
        .await
        .unwrap();

    let summary: Vec<(&str, TestStatus)> = outcome
        .report
        .results()
        .iter()
        .map(|r| (r.id(), r.status()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("1.1", TestStatus::Pass),
            ("1.2a", TestStatus::Pass),
            ("1.2", TestStatus::Inconclusive),
        ]
    );
    assert_eq!(*outcome.completion(), RunCompletion::Interrupted);
}

const REGISTER_PLAN: &str = r#"
title = "Holding registers"

[[case]]
id = "R1"
name = "Write then read back"

[[case.step]]
kind = "command"
line = "set register 10 value:42"
settle_ms = 100

[[case.step]]
kind = "sample"
line = "show registers 10 2"
bind = { first = 10, second = 11 }

[[case.step]]
kind = "exact"
sample = "first"
expected = 42

[[case.step]]
kind = "exact"
id = "R1b"
name = "Untouched neighbour"
sample = "second"
expected = 0
"#;

#[tokio::test(start_paused = true)]
async fn toml_plan_runs_with_transcript_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let plan_path = dir.path().join("plan.toml");
    std::fs::write(&plan_path, REGISTER_PLAN).unwrap();
    let plan = TestPlan::load(&plan_path).unwrap();

    let transcript = Transcript::shared();
    let runner = TestRunner::new(RunnerConfig::default()).with_transcript(transcript.clone());
    let outcome = runner
        .run(Box::new(PulseCounter::device(5000.0)), &plan.into_cases())
        .await
        .unwrap();

    assert!(outcome.all_passed(), "{:?}", outcome.report.results());
    assert_eq!(outcome.report.total(), 2);
    assert!(outcome.stats.bytes_sent > 0);

    let entries = transcript.lock().entries().to_vec();
    assert!(entries.iter().any(|e| e.text == "set register 10 value:42"));
    assert!(entries.iter().any(|e| e.text.contains("10: 42\t0")));

    let json_path = dir.path().join("report.json");
    ReportGenerator::default().write_json(&outcome.report, &json_path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(json["results"][1]["id"], "R1b");
    assert_eq!(json["results"][1]["status"], "PASS");
}

#[tokio::test(start_paused = true)]
async fn late_replies_never_leak_into_the_next_case() {
    // Every reply arrives after the 500 ms read settle window.
    let device = VirtualDevice::from_fn(|line| {
        line.starts_with("show registers")
            .then(|| DeviceReply::after("100: 50000\r\n", Duration::from_millis(900)))
    });
    let first = ScriptedCase::new("A", "Slow dump").sample("show registers 100 1", &[("count", 100)]).step(
        pulsebench_core::core::plan::Step::Exact {
            id: None,
            name: None,
            sample: "count".into(),
            expected: 50000,
        },
    );
    let second = first.clone();

    let runner = TestRunner::new(RunnerConfig::default());
    let outcome = runner.run(Box::new(device), &cases(vec![first, second])).await.unwrap();

    let results = outcome.report.results();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status() == TestStatus::Inconclusive));
}
