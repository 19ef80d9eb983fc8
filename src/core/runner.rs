//! Sequential test runner
//!
//! Opens the transport once, runs every case in order on one channel and
//! closes the transport on every exit path. A case that fails unexpectedly
//! is turned into a single FAIL result and the run moves on; only a lost
//! link or an interrupt ends the run early, and even then the results
//! collected so far are reported.

use super::channel::CommandChannel;
use super::result::{RunCompletion, TestResult, TestStatus, TestSuiteReport};
use super::testcase::{CaseContext, CaseError, StepDefaults, TestCase};
use super::transcript::SharedTranscript;
use super::transport::{BufferedTransport, TransportError, TransportStats, TransportTrait};
use crate::config::{BenchConfig, LineEnding};
use chrono::Local;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runner settings
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Background reader poll interval
    pub poll_interval: Duration,
    /// Command terminator
    pub line_ending: LineEnding,
    /// Step defaults handed to every case
    pub defaults: StepDefaults,
    /// Wait after opening; boot output received meanwhile is discarded
    pub startup_delay: Duration,
    /// Pause between cases
    pub inter_case_delay: Duration,
    /// Extra report metadata
    pub metadata: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_config(&BenchConfig::default())
    }
}

impl RunnerConfig {
    /// Derive runner settings from the bench configuration
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            poll_interval: config.channel.poll_interval(),
            line_ending: config.channel.line_ending,
            defaults: StepDefaults {
                settle: config.channel.settle(),
                config_settle: config.channel.config_settle(),
                tolerance: config.evaluation.tolerance,
            },
            startup_delay: Duration::from_millis(config.run.startup_delay_ms),
            inter_case_delay: Duration::from_millis(config.run.inter_case_delay_ms),
            metadata: config.report.metadata.clone(),
        }
    }
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Every collected result plus how the run ended
    pub report: TestSuiteReport,
    /// Transport statistics at the end of the run
    pub stats: TransportStats,
}

impl RunOutcome {
    /// How the run ended
    pub fn completion(&self) -> &RunCompletion {
        &self.report.completion
    }

    /// Every case ran and every result passed
    pub fn all_passed(&self) -> bool {
        self.report.all_passed()
    }
}

/// Test runner
pub struct TestRunner {
    config: RunnerConfig,
    cancel: CancellationToken,
    transcript: Option<SharedTranscript>,
}

impl TestRunner {
    /// Create a runner
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
            transcript: None,
        }
    }

    /// Record every exchange into `transcript`
    #[must_use]
    pub fn with_transcript(mut self, transcript: SharedTranscript) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Token that interrupts the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `cases` in order against `endpoint`.
    ///
    /// Only a failure to open the endpoint is returned as an error; every
    /// other failure ends up in the report.
    pub async fn run(
        &self,
        endpoint: Box<dyn TransportTrait>,
        cases: &[Box<dyn TestCase>],
    ) -> Result<RunOutcome, TransportError> {
        let started = Local::now();
        let transport = BufferedTransport::open(endpoint, self.config.poll_interval).await?;
        let endpoint_info = transport.connection_info().to_string();
        info!(endpoint = %endpoint_info, cases = cases.len(), "run started");

        let mut channel = CommandChannel::new(transport, self.config.line_ending);
        if let Some(transcript) = &self.transcript {
            channel = channel.with_transcript(transcript.clone());
        }
        let mut ctx = CaseContext::new(channel, self.cancel.clone(), self.config.defaults);

        let (results, completion) = self.execute_all(&ctx, cases).await;

        let stats = ctx.channel().transport().stats().await;
        if let Err(e) = ctx.channel_mut().close().await {
            warn!("closing transport failed: {e}");
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("Endpoint".to_string(), endpoint_info);
        metadata.insert("Started".to_string(), started.format("%Y-%m-%d %H:%M:%S").to_string());
        metadata.insert("Finished".to_string(), Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        metadata.extend(self.config.metadata.clone());

        let report = TestSuiteReport::new(results, completion).with_metadata(metadata);
        info!(
            total = report.total(),
            passed = report.passed(),
            failed = report.failed(),
            inconclusive = report.inconclusive(),
            "run finished"
        );
        Ok(RunOutcome { report, stats })
    }

    async fn pause(&self, duration: Duration) -> Result<(), CaseError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            () = self.cancel.cancelled() => Err(CaseError::Interrupted),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn execute_all(
        &self,
        ctx: &CaseContext,
        cases: &[Box<dyn TestCase>],
    ) -> (Vec<TestResult>, RunCompletion) {
        let mut results = Vec::new();

        if self.pause(self.config.startup_delay).await.is_err() {
            return (results, RunCompletion::Interrupted);
        }
        if let Err(e) = ctx.channel().discard_pending() {
            error!("link lost before the first case: {e}");
            return (results, RunCompletion::ConnectionLost(e.to_string()));
        }

        for (index, case) in cases.iter().enumerate() {
            if index > 0 && self.pause(self.config.inter_case_delay).await.is_err() {
                return (results, RunCompletion::Interrupted);
            }
            if self.cancel.is_cancelled() {
                return (results, RunCompletion::Interrupted);
            }

            info!(case = case.id(), name = case.name(), "case started");
            let outcome = AssertUnwindSafe(case.execute(ctx)).catch_unwind().await;
            let recorded = ctx.take_recorded();
            let recorded_count = recorded.len();
            results.extend(recorded);
            match outcome {
                Ok(Ok(case_results)) => {
                    info!(case = case.id(), results = recorded_count + case_results.len(), "case finished");
                    results.extend(case_results);
                }
                Ok(Err(CaseError::Interrupted)) => {
                    warn!(case = case.id(), "interrupted");
                    results.push(
                        TestResult::new(case.id(), case.name(), TestStatus::Inconclusive, "case completes", "interrupted")
                            .with_notes("run interrupted while the case was in progress"),
                    );
                    return (results, RunCompletion::Interrupted);
                }
                Ok(Err(e)) if e.is_connection_loss() => {
                    error!(case = case.id(), "connection lost: {e}");
                    results.push(failure(case.as_ref(), &e.to_string()));
                    return (results, RunCompletion::ConnectionLost(e.to_string()));
                }
                Ok(Err(e)) => {
                    warn!(case = case.id(), "case failed: {e}");
                    results.push(failure(case.as_ref(), &e.to_string()));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(case = case.id(), "case panicked: {message}");
                    results.push(failure(case.as_ref(), &format!("panic: {message}")));
                }
            }
        }
        (results, RunCompletion::Completed)
    }
}

fn failure(case: &dyn TestCase, error: &str) -> TestResult {
    TestResult::new(case.id(), case.name(), TestStatus::Fail, "case completes", "error").with_notes(error)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulator::{DeviceReply, LinkControl, VirtualDevice};
    use crate::core::testcase::Check;
    use async_trait::async_trait;

    enum Behaviour {
        Pass,
        Error,
        Panic,
        SampleMissing,
        Observe(Duration),
        Sever(LinkControl),
        RecordThenError,
    }

    struct FakeCase {
        id: String,
        behaviour: Behaviour,
    }

    fn fake_case(id: &str, behaviour: Behaviour) -> Box<dyn TestCase> {
        Box::new(FakeCase {
            id: id.to_string(),
            behaviour,
        })
    }

    #[async_trait]
    impl TestCase for FakeCase {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            "fake"
        }

        async fn execute(&self, ctx: &CaseContext) -> Result<Vec<TestResult>, CaseError> {
            let pass = || TestResult::new(&self.id, "fake", TestStatus::Pass, "ok", "ok");
            match &self.behaviour {
                Behaviour::Pass => Ok(vec![pass()]),
                Behaviour::Error => Err(CaseError::Step("register dump was garbled".into())),
                Behaviour::Panic => panic!("case exploded"),
                Behaviour::SampleMissing => {
                    let sample = ctx.sample("show registers 100 1", 999).await?;
                    Ok(vec![Check::new(&self.id, "fake").tolerance(&sample, 50000.0, 0.05)])
                }
                Behaviour::Observe(duration) => {
                    ctx.observe(*duration).await?;
                    Ok(vec![pass()])
                }
                Behaviour::RecordThenError => {
                    ctx.record(TestResult::new(format!("{}a", self.id), "fake", TestStatus::Pass, "ok", "ok"));
                    Err(CaseError::Step("second dump was garbled".into()))
                }
                Behaviour::Sever(link) => {
                    link.sever();
                    ctx.send("show registers 100 1", Duration::from_millis(100)).await?;
                    Ok(vec![pass()])
                }
            }
        }
    }

    fn device() -> VirtualDevice {
        VirtualDevice::from_fn(|_| Some(DeviceReply::now("100: 7\r\n")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_case_does_not_abort_run() {
        let runner = TestRunner::new(RunnerConfig::default());
        let cases = vec![
            fake_case("1", Behaviour::Pass),
            fake_case("2", Behaviour::Error),
            fake_case("3", Behaviour::Pass),
        ];
        let outcome = runner.run(Box::new(device()), &cases).await.unwrap();

        let results = outcome.report.results();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status(), TestStatus::Pass);
        assert_eq!(results[1].status(), TestStatus::Fail);
        assert!(results[1].notes().contains("register dump was garbled"));
        assert_eq!(results[2].status(), TestStatus::Pass);
        assert_eq!(*outcome.completion(), RunCompletion::Completed);
        assert!(!outcome.all_passed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorded_results_survive_case_error() {
        let runner = TestRunner::new(RunnerConfig::default());
        let cases = vec![fake_case("1", Behaviour::RecordThenError), fake_case("2", Behaviour::Pass)];
        let outcome = runner.run(Box::new(device()), &cases).await.unwrap();

        let summary: Vec<(&str, TestStatus)> =
            outcome.report.results().iter().map(|r| (r.id(), r.status())).collect();
        assert_eq!(
            summary,
            vec![("1a", TestStatus::Pass), ("1", TestStatus::Fail), ("2", TestStatus::Pass)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_case_becomes_failure() {
        let runner = TestRunner::new(RunnerConfig::default());
        let cases = vec![fake_case("1", Behaviour::Panic), fake_case("2", Behaviour::Pass)];
        let outcome = runner.run(Box::new(device()), &cases).await.unwrap();

        let results = outcome.report.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status(), TestStatus::Fail);
        assert!(results[0].notes().contains("case exploded"));
        assert_eq!(results[1].status(), TestStatus::Pass);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_sample_is_inconclusive() {
        let runner = TestRunner::new(RunnerConfig::default());
        let outcome = runner
            .run(Box::new(device()), &[fake_case("1", Behaviour::SampleMissing)])
            .await
            .unwrap();
        assert_eq!(outcome.report.results()[0].status(), TestStatus::Inconclusive);
        assert_eq!(outcome.report.failed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_keeps_collected_results() {
        let runner = TestRunner::new(RunnerConfig::default());
        let cancel = runner.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let cases = vec![
            fake_case("1", Behaviour::Pass),
            fake_case("2", Behaviour::Observe(Duration::from_secs(60))),
            fake_case("3", Behaviour::Pass),
        ];
        let started = tokio::time::Instant::now();
        let outcome = runner.run(Box::new(device()), &cases).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(*outcome.completion(), RunCompletion::Interrupted);
        let results = outcome.report.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status(), TestStatus::Pass);
        assert_eq!(results[1].status(), TestStatus::Inconclusive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_stops_run() {
        let device = device();
        let link = device.link();
        let runner = TestRunner::new(RunnerConfig::default());
        let cases = vec![
            fake_case("1", Behaviour::Pass),
            fake_case("2", Behaviour::Sever(link)),
            fake_case("3", Behaviour::Pass),
        ];
        let outcome = runner.run(Box::new(device), &cases).await.unwrap();

        assert!(matches!(outcome.completion(), RunCompletion::ConnectionLost(_)));
        let results = outcome.report.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].status(), TestStatus::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_propagates() {
        let device = device();
        device.link().refuse_connect();
        let runner = TestRunner::new(RunnerConfig::default());
        let err = runner
            .run(Box::new(device), &[fake_case("1", Behaviour::Pass)])
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_run_records_metadata() {
        let device = VirtualDevice::from_fn(|line| match line {
            "show registers 100 1" => Some(DeviceReply::now("100: 7\r\n")),
            _ => None,
        });
        let mut config = RunnerConfig::default();
        config.metadata.insert("Firmware".into(), "Build #106".into());
        let runner = TestRunner::new(config);
        let outcome = runner.run(Box::new(device), &[]).await.unwrap();

        assert_eq!(outcome.report.total(), 0);
        assert!(!outcome.all_passed());
        assert_eq!(outcome.report.metadata["Firmware"], "Build #106");
        assert!(outcome.report.metadata["Endpoint"].contains("simulated"));
    }
}
