//! Declarative test plans
//!
//! A plan is an ordered list of [`ScriptedCase`]s, each a list of
//! [`Step`]s: commands, observation waits, samples bound to names, and
//! checks over those names. Plans load from TOML:
//!
//! ```toml
//! [[case]]
//! id = "1.1"
//! name = "Basic counting"
//!
//! [[case.step]]
//! kind = "command"
//! line = "set register 140 value:2"
//! settle_ms = 100
//!
//! [[case.step]]
//! kind = "wait"
//! ms = 10000
//!
//! [[case.step]]
//! kind = "sample"
//! line = "show registers 100 40"
//! bind = { count = 100 }
//!
//! [[case.step]]
//! kind = "tolerance"
//! sample = "count"
//! expected = 50000
//! ```
//!
//! The built-in counter validation suite is expressed the same way, see
//! [`counter_suite`].

use super::result::TestResult;
use super::telemetry::{self, RegisterSample};
use super::testcase::{CaseContext, CaseError, Check, TestCase};
use crate::config::ConfigError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// One step of a scripted case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Send a configuration or trigger command
    Command {
        /// Command line
        line: String,
        /// Settle time; the configuration settle time when unset
        settle_ms: Option<u64>,
        /// Text the response must contain
        expect: Option<String>,
    },
    /// Observe for a fixed duration
    Wait {
        /// Duration in milliseconds
        ms: u64,
    },
    /// Send a sampling command and bind addresses to names
    Sample {
        /// Command line
        line: String,
        /// Sample name to address
        bind: BTreeMap<String, u32>,
        /// Settle time; the read settle time when unset
        settle_ms: Option<u64>,
    },
    /// Sample lies within a tolerance of an expected value
    Tolerance {
        /// Result id, the case id when unset
        id: Option<String>,
        /// Result name, the case name when unset
        name: Option<String>,
        /// Sample name
        sample: String,
        /// Expected value
        expected: f64,
        /// Tolerance fraction, the configured default when unset
        tolerance: Option<f64>,
    },
    /// Sample equals a value
    Exact {
        /// Result id, the case id when unset
        id: Option<String>,
        /// Result name, the case name when unset
        name: Option<String>,
        /// Sample name
        sample: String,
        /// Expected value
        expected: i64,
    },
    /// Two samples are equal
    Unchanged {
        /// Result id, the case id when unset
        id: Option<String>,
        /// Result name, the case name when unset
        name: Option<String>,
        /// Earlier sample
        first: String,
        /// Later sample
        second: String,
    },
    /// Second sample advanced past the first by an expected amount
    Delta {
        /// Result id, the case id when unset
        id: Option<String>,
        /// Result name, the case name when unset
        name: Option<String>,
        /// Earlier sample
        first: String,
        /// Later sample
        second: String,
        /// Expected increase
        expected: f64,
        /// Tolerance fraction, the configured default when unset
        tolerance: Option<f64>,
    },
    /// Sample matches a count folded into a narrower register
    Wrapped {
        /// Result id, the case id when unset
        id: Option<String>,
        /// Result name, the case name when unset
        name: Option<String>,
        /// Sample name
        sample: String,
        /// Count before wrapping
        unwrapped: i64,
        /// Register width in bits
        bits: u32,
        /// Tolerance fraction, the configured default when unset
        tolerance: Option<f64>,
    },
}

impl Step {
    fn label(&self) -> Option<(Option<&str>, Option<&str>)> {
        match self {
            Self::Command { .. } | Self::Wait { .. } | Self::Sample { .. } => None,
            Self::Tolerance { id, name, .. }
            | Self::Exact { id, name, .. }
            | Self::Unchanged { id, name, .. }
            | Self::Delta { id, name, .. }
            | Self::Wrapped { id, name, .. } => Some((id.as_deref(), name.as_deref())),
        }
    }

    fn sample_refs(&self) -> Vec<&str> {
        match self {
            Self::Tolerance { sample, .. } | Self::Exact { sample, .. } | Self::Wrapped { sample, .. } => {
                vec![sample.as_str()]
            }
            Self::Unchanged { first, second, .. } | Self::Delta { first, second, .. } => {
                vec![first.as_str(), second.as_str()]
            }
            _ => Vec::new(),
        }
    }
}

/// Test case driven by a list of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedCase {
    id: String,
    name: String,
    #[serde(rename = "step", default)]
    steps: Vec<Step>,
}

impl ScriptedCase {
    /// Create an empty case
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a command with an explicit settle time
    #[must_use]
    pub fn command(self, line: impl Into<String>, settle: Duration) -> Self {
        self.step(Step::Command {
            line: line.into(),
            settle_ms: Some(settle.as_millis() as u64),
            expect: None,
        })
    }

    /// Append a configuration command using the configuration settle time
    #[must_use]
    pub fn configure(self, line: impl Into<String>) -> Self {
        self.step(Step::Command {
            line: line.into(),
            settle_ms: None,
            expect: None,
        })
    }

    /// Append an observation wait
    #[must_use]
    pub fn wait(self, duration: Duration) -> Self {
        self.step(Step::Wait {
            ms: duration.as_millis() as u64,
        })
    }

    /// Append a sampling command binding `(name, address)` pairs
    #[must_use]
    pub fn sample(self, line: impl Into<String>, bind: &[(&str, u32)]) -> Self {
        self.step(Step::Sample {
            line: line.into(),
            bind: bind.iter().map(|(n, a)| ((*n).to_string(), *a)).collect(),
            settle_ms: None,
        })
    }

    /// Steps in order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Every check must refer to a sample bound by an earlier step.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("case `{}` has an empty id", self.name)));
        }
        let mut bound: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if let Step::Sample { bind, .. } = step {
                bound.extend(bind.keys().map(String::as_str));
            }
            if let Some(unknown) = step.sample_refs().into_iter().find(|s| !bound.contains(s)) {
                return Err(ConfigError::Invalid(format!(
                    "case {}: check refers to unknown sample `{unknown}`",
                    self.id
                )));
            }
        }
        Ok(())
    }

    fn evaluate(
        &self,
        step: &Step,
        samples: &HashMap<&str, RegisterSample>,
        default_tolerance: f64,
    ) -> Result<TestResult, CaseError> {
        let lookup = |name: &str| {
            samples
                .get(name)
                .copied()
                .ok_or_else(|| CaseError::Step(format!("sample `{name}` was never taken")))
        };
        let (id, name) = step.label().unwrap_or((None, None));
        let check = Check::new(id.unwrap_or(self.id.as_str()), name.unwrap_or(self.name.as_str()));

        let result = match step {
            Step::Tolerance {
                sample,
                expected,
                tolerance,
                ..
            } => check.tolerance(&lookup(sample)?, *expected, tolerance.unwrap_or(default_tolerance)),
            Step::Exact { sample, expected, .. } => check.exact(&lookup(sample)?, *expected),
            Step::Unchanged { first, second, .. } => check.unchanged(&lookup(first)?, &lookup(second)?),
            Step::Delta {
                first,
                second,
                expected,
                tolerance,
                ..
            } => check.delta(
                &lookup(first)?,
                &lookup(second)?,
                *expected,
                tolerance.unwrap_or(default_tolerance),
            ),
            Step::Wrapped {
                sample,
                unwrapped,
                bits,
                tolerance,
                ..
            } => check.wrapped(
                &lookup(sample)?,
                *unwrapped,
                *bits,
                tolerance.unwrap_or(default_tolerance),
            ),
            Step::Command { .. } | Step::Wait { .. } | Step::Sample { .. } => {
                return Err(CaseError::Step("not a check".into()));
            }
        };
        Ok(result)
    }
}

#[async_trait]
impl TestCase for ScriptedCase {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &CaseContext) -> Result<Vec<TestResult>, CaseError> {
        let defaults = *ctx.defaults();
        let mut samples: HashMap<&str, RegisterSample> = HashMap::new();

        for step in &self.steps {
            match step {
                Step::Command {
                    line,
                    settle_ms,
                    expect,
                } => {
                    let settle = settle_ms.map_or(defaults.config_settle, Duration::from_millis);
                    let response = ctx.send(line, settle).await?;
                    if let Some(expected) = expect {
                        if !response.text().contains(expected.as_str()) {
                            return Err(CaseError::Setup(format!(
                                "`{line}` answered {:?}, expected it to contain {expected:?}",
                                response.text().trim()
                            )));
                        }
                    }
                }
                Step::Wait { ms } => ctx.observe(Duration::from_millis(*ms)).await?,
                Step::Sample { line, bind, settle_ms } => {
                    let settle = settle_ms.map_or(defaults.settle, Duration::from_millis);
                    let response = ctx.send(line, settle).await?;
                    for (name, address) in bind {
                        let sample = telemetry::sample(response.text(), *address);
                        debug!(case = %self.id, sample = %name, address, value = ?sample.value, "sampled");
                        samples.insert(name.as_str(), sample);
                    }
                }
                check => ctx.record(self.evaluate(check, &samples, defaults.tolerance)?),
            }
        }
        Ok(Vec::new())
    }
}

/// An ordered list of scripted cases
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    /// Optional plan title
    #[serde(default)]
    pub title: Option<String>,
    /// Cases in execution order
    #[serde(rename = "case", default)]
    pub cases: Vec<ScriptedCase>,
}

impl TestPlan {
    /// Parse and validate a TOML plan; `origin` names the source in errors.
    pub fn from_toml_named(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let plan: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse and validate an inline TOML plan
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Self::from_toml_named(text, Path::new("<inline plan>"))
    }

    /// Load and validate a TOML plan file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_named(&text, path)
    }

    /// Validate every case
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cases.iter().try_for_each(ScriptedCase::validate)
    }

    /// Cases ready for the runner
    pub fn into_cases(self) -> Vec<Box<dyn TestCase>> {
        self.cases
            .into_iter()
            .map(|c| Box::new(c) as Box<dyn TestCase>)
            .collect()
    }
}

/// Register mapping of one counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRegisters {
    /// Counter value
    pub index: u32,
    /// Value after the prescaler
    pub raw: u32,
    /// Measured frequency
    pub freq: u32,
    /// Overflow flag
    pub overload: u32,
    /// Control register
    pub ctrl: u32,
}

impl CounterRegisters {
    /// Registers laid out from `base` in steps of ten
    pub fn from_base(base: u32) -> Self {
        Self {
            index: base,
            raw: base + 10,
            freq: base + 20,
            overload: base + 30,
            ctrl: base + 40,
        }
    }

    fn options(&self) -> String {
        format!(
            "index-reg:{} raw-reg:{} freq-reg:{} overload-reg:{} ctrl-reg:{}",
            self.index, self.raw, self.freq, self.overload, self.ctrl
        )
    }
}

/// Values written to a control register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlValues {
    /// Clear count and overflow flag
    pub reset: i64,
    /// Start counting
    pub start: i64,
    /// Stop counting
    pub stop: i64,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            reset: 1,
            start: 2,
            stop: 4,
        }
    }
}

/// Parameters of the counter validation suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterPlan {
    /// Pulse rate of the signal source, in Hz
    pub rate_hz: f64,
    /// Input pin of the hardware counter
    pub hw_gpio: u32,
    /// Input pin of the interrupt-driven counter
    pub isr_pin: u32,
    /// Settle time of control-register writes, in milliseconds
    pub control_settle_ms: u64,
    /// Counting window of the basic tests, in seconds
    pub count_secs: u64,
    /// Window of the stop and resume tests, in seconds
    pub pause_secs: u64,
    /// Window of the overflow test, in seconds
    pub overflow_secs: u64,
    /// Start value of the count-down test
    pub start_value: i64,
    /// Divider of the prescaler test
    pub prescaler: i64,
    /// Register width of the overflow test
    pub overflow_bits: u32,
    /// Tolerance of the basic counting test
    pub tolerance: f64,
    /// Tolerance of every other rate check
    pub loose_tolerance: f64,
    /// Registers of the hardware counter
    pub hw_registers: CounterRegisters,
    /// Registers of the interrupt-driven counter
    pub isr_registers: CounterRegisters,
    /// Control register values
    pub control: ControlValues,
}

impl Default for CounterPlan {
    fn default() -> Self {
        Self {
            rate_hz: 5000.0,
            hw_gpio: 19,
            isr_pin: 13,
            control_settle_ms: 100,
            count_secs: 10,
            pause_secs: 5,
            overflow_secs: 15,
            start_value: 100_000,
            prescaler: 10,
            overflow_bits: 16,
            tolerance: 0.05,
            loose_tolerance: 0.10,
            hw_registers: CounterRegisters::from_base(100),
            isr_registers: CounterRegisters::from_base(200),
            control: ControlValues::default(),
        }
    }
}

impl CounterPlan {
    fn hw_config(&self, direction: &str, prescaler: i64, bits: u32, start_value: Option<i64>) -> String {
        let start = start_value.map(|v| format!("start-value:{v} ")).unwrap_or_default();
        format!(
            "set counter 1 mode 1 hw-mode:hw edge:rising direction:{direction} hw-gpio:{} \
             prescaler:{prescaler} bit-width:{bits} {start}{}",
            self.hw_gpio,
            self.hw_registers.options()
        )
    }

    fn isr_config(&self) -> String {
        format!(
            "set counter 2 mode 1 hw-mode:sw-isr edge:rising direction:up interrupt-pin:{} \
             prescaler:1 bit-width:32 {}",
            self.isr_pin,
            self.isr_registers.options()
        )
    }

    fn control_command(&self, regs: &CounterRegisters, value: i64) -> String {
        format!("set register {} value:{value}", regs.ctrl)
    }

    fn dump(regs: &CounterRegisters) -> String {
        format!("show registers {} 40", regs.index)
    }

    fn pulses(&self, secs: u64) -> f64 {
        self.rate_hz * secs as f64
    }
}

fn tolerance(id: &str, name: &str, sample: &str, expected: f64, tolerance: f64) -> Step {
    Step::Tolerance {
        id: Some(id.into()),
        name: Some(name.into()),
        sample: sample.into(),
        expected,
        tolerance: Some(tolerance),
    }
}

fn exact(id: &str, name: &str, sample: &str, expected: i64) -> Step {
    Step::Exact {
        id: Some(id.into()),
        name: Some(name.into()),
        sample: sample.into(),
        expected,
    }
}

/// Standard counter validation suite.
///
/// Cases run in order and rely on state left by earlier ones: the stop
/// test stops the counter started by the basic test, the reset test
/// clears the value the resume test left behind.
pub fn counter_suite(plan: &CounterPlan) -> Vec<ScriptedCase> {
    let hw = &plan.hw_registers;
    let isr = &plan.isr_registers;
    let ctl = plan.control;
    let control_settle = Duration::from_millis(plan.control_settle_ms);
    let count = Duration::from_secs(plan.count_secs);
    let pause = Duration::from_secs(plan.pause_secs);
    let loose = plan.loose_tolerance;

    let basic = ScriptedCase::new("1.1", "HW mode basic counting")
        .configure(plan.hw_config("up", 1, 32, None))
        .command(plan.control_command(hw, ctl.start), control_settle)
        .wait(count)
        .sample(CounterPlan::dump(hw), &[("count", hw.index)])
        .step(tolerance("1.1", "HW mode basic counting", "count", plan.pulses(plan.count_secs), plan.tolerance));

    let stop_resume = ScriptedCase::new("1.2", "Stop/start")
        .command(plan.control_command(hw, ctl.stop), control_settle)
        .sample(CounterPlan::dump(hw), &[("stopped", hw.index)])
        .wait(pause)
        .sample(CounterPlan::dump(hw), &[("still", hw.index)])
        .step(Step::Unchanged {
            id: Some("1.2a".into()),
            name: Some("Stop holds the count".into()),
            first: "stopped".into(),
            second: "still".into(),
        })
        .command(plan.control_command(hw, ctl.start), control_settle)
        .wait(pause)
        .sample(CounterPlan::dump(hw), &[("resumed", hw.index)])
        .step(Step::Delta {
            id: Some("1.2b".into()),
            name: Some("Start resumes counting".into()),
            first: "still".into(),
            second: "resumed".into(),
            expected: plan.pulses(plan.pause_secs),
            tolerance: Some(loose),
        });

    let reset = ScriptedCase::new("1.3", "Reset")
        .command(plan.control_command(hw, ctl.reset), control_settle)
        .sample(CounterPlan::dump(hw), &[("count", hw.index), ("overflow", hw.overload)])
        .step(exact("1.3a", "Reset clears the count", "count", 0))
        .step(exact("1.3b", "Reset clears the overflow flag", "overflow", 0));

    let down = ScriptedCase::new("1.4", "Direction down")
        .configure(plan.hw_config("down", 1, 32, Some(plan.start_value)))
        .command(plan.control_command(hw, ctl.start), control_settle)
        .wait(pause)
        .sample(CounterPlan::dump(hw), &[("count", hw.index)])
        .step(tolerance(
            "1.4",
            "Direction down",
            "count",
            plan.start_value as f64 - plan.pulses(plan.pause_secs),
            loose,
        ));

    let prescaled = plan.pulses(plan.count_secs) / plan.prescaler.max(1) as f64;
    let prescaler = ScriptedCase::new("1.5", "Prescaler")
        .configure(plan.hw_config("up", plan.prescaler, 32, None))
        .command(plan.control_command(hw, ctl.reset), control_settle)
        .command(plan.control_command(hw, ctl.start), control_settle)
        .wait(count)
        .sample(CounterPlan::dump(hw), &[("index", hw.index), ("raw", hw.raw)])
        .step(tolerance(
            "1.5a",
            "Prescaler: index counts every edge",
            "index",
            plan.pulses(plan.count_secs),
            loose,
        ))
        .step(tolerance(
            "1.5b",
            &format!("Prescaler: raw divided by {}", plan.prescaler),
            "raw",
            prescaled,
            loose,
        ));

    let overflow = ScriptedCase::new("1.6", "Overflow")
        .configure(plan.hw_config("up", 1, plan.overflow_bits, None))
        .command(plan.control_command(hw, ctl.reset), control_settle)
        .command(plan.control_command(hw, ctl.start), control_settle)
        .wait(Duration::from_secs(plan.overflow_secs))
        .sample(CounterPlan::dump(hw), &[("count", hw.index), ("overflow", hw.overload)])
        .step(Step::Wrapped {
            id: Some("1.6a".into()),
            name: Some(format!("{}-bit overflow wraps the count", plan.overflow_bits)),
            sample: "count".into(),
            unwrapped: plan.pulses(plan.overflow_secs) as i64,
            bits: plan.overflow_bits,
            tolerance: Some(loose),
        })
        .step(exact("1.6b", "Overflow sets the overflow flag", "overflow", 1));

    let interrupt = ScriptedCase::new("2.1", "SW-ISR mode basic counting")
        .configure(plan.isr_config())
        .command(plan.control_command(isr, ctl.start), control_settle)
        .wait(count)
        .sample(CounterPlan::dump(isr), &[("count", isr.index), ("freq", isr.freq)])
        .step(tolerance(
            "2.1a",
            "SW-ISR mode basic counting",
            "count",
            plan.pulses(plan.count_secs),
            loose,
        ))
        .step(tolerance("2.1b", "SW-ISR mode frequency", "freq", plan.rate_hz, loose));

    vec![basic, stop_resume, reset, down, prescaler, overflow, interrupt]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LineEnding;
    use crate::core::channel::CommandChannel;
    use crate::core::result::TestStatus;
    use crate::core::simulator::{DeviceReply, VirtualDevice};
    use crate::core::testcase::StepDefaults;
    use crate::core::transport::BufferedTransport;
    use tokio_util::sync::CancellationToken;

    const PLAN: &str = r#"
title = "Smoke"

[[case]]
id = "R1"
name = "Holding register"

[[case.step]]
kind = "command"
line = "set register 10 value:42"
settle_ms = 100
expect = "Reg[10]"

[[case.step]]
kind = "sample"
line = "show registers 10 1"
bind = { reg = 10, other = 11 }

[[case.step]]
kind = "exact"
sample = "reg"
expected = 42

[[case.step]]
kind = "tolerance"
name = "Neighbour"
sample = "other"
expected = 7
"#;

    async fn context(device: VirtualDevice) -> CaseContext {
        let transport = BufferedTransport::open(Box::new(device), Duration::from_millis(10))
            .await
            .unwrap();
        CaseContext::new(
            CommandChannel::new(transport, LineEnding::CrLf),
            CancellationToken::new(),
            StepDefaults::default(),
        )
    }

    fn register_device() -> VirtualDevice {
        VirtualDevice::from_fn(|line| match line {
            "set register 10 value:42" => Some(DeviceReply::now("Reg[10] = 42\r\n")),
            "show registers 10 1" => Some(DeviceReply::now("10: 42\r\n")),
            _ => None,
        })
    }

    #[test]
    fn test_parse_plan() {
        let plan = TestPlan::from_toml(PLAN).unwrap();
        assert_eq!(plan.title.as_deref(), Some("Smoke"));
        assert_eq!(plan.cases.len(), 1);
        assert_eq!(plan.cases[0].steps().len(), 4);
        assert!(matches!(plan.cases[0].steps()[1], Step::Sample { ref bind, .. } if bind["other"] == 11));
    }

    #[test]
    fn test_unknown_sample_rejected() {
        let text = PLAN.replace("sample = \"reg\"", "sample = \"missing\"");
        let err = TestPlan::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("unknown sample `missing`"));
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = TestPlan::from_toml("[[case]\nid = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[[case]\nid = ").unwrap();
        let err = TestPlan::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path.ends_with("broken.toml")));
    }

    #[test]
    fn test_check_before_sample_rejected() {
        let case = ScriptedCase::new("X", "Out of order")
            .step(exact("X", "early", "value", 0))
            .sample("show registers 1 1", &[("value", 1)]);
        assert!(case.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_case_results() {
        let ctx = context(register_device()).await;
        let plan = TestPlan::from_toml(PLAN).unwrap();
        assert!(plan.cases[0].execute(&ctx).await.unwrap().is_empty());
        let results = ctx.take_recorded();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id(), "R1");
        assert_eq!(results[0].name(), "Holding register");
        assert_eq!(results[0].status(), TestStatus::Pass);
        // Address 11 is not in the dump.
        assert_eq!(results[1].name(), "Neighbour");
        assert_eq!(results[1].status(), TestStatus::Inconclusive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expect_mismatch_is_setup_error() {
        let ctx = context(VirtualDevice::from_fn(|_| Some(DeviceReply::now("ERROR\r\n")))).await;
        let plan = TestPlan::from_toml(PLAN).unwrap();
        let err = plan.cases[0].execute(&ctx).await.unwrap_err();
        assert!(matches!(err, CaseError::Setup(_)));
    }

    #[test]
    fn test_counter_suite_shape() {
        let suite = counter_suite(&CounterPlan::default());
        let ids: Vec<&str> = suite.iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec!["1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "2.1"]);
        suite.iter().try_for_each(ScriptedCase::validate).unwrap();

        let first = &suite[0].steps()[0];
        assert_eq!(
            *first,
            Step::Command {
                line: "set counter 1 mode 1 hw-mode:hw edge:rising direction:up hw-gpio:19 \
                       prescaler:1 bit-width:32 index-reg:100 raw-reg:110 freq-reg:120 \
                       overload-reg:130 ctrl-reg:140"
                    .into(),
                settle_ms: None,
                expect: None,
            }
        );
        assert!(suite[5].steps().iter().any(|s| matches!(
            s,
            Step::Wrapped { unwrapped: 75000, bits: 16, .. }
        )));
    }

    #[test]
    fn test_counter_plan_from_toml() {
        let plan: CounterPlan = toml::from_str(
            r#"
rate_hz = 1000.0
control_settle_ms = 50

[hw_registers]
index = 300
raw = 310
freq = 320
overload = 330
ctrl = 340
"#,
        )
        .unwrap();
        assert_eq!(plan.pause_secs, 5);
        assert_eq!(plan.control.stop, 4);
        let suite = counter_suite(&plan);
        assert!(suite[0].steps().iter().any(|s| matches!(
            s,
            Step::Command { line, .. } if line == "set register 340 value:2"
        )));
    }
}
