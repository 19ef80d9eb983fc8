//! Test cases and the context they run in
//!
//! A case drives the device through a [`CaseContext`]: configuration and
//! trigger commands, observation waits, telemetry samples. Conditions are
//! turned into results with [`Check`], which reports INCONCLUSIVE whenever
//! a sample is missing instead of comparing against a made-up zero.

use super::channel::{CommandChannel, CommandRequest, CommandResponse};
use super::result::{TestResult, TestStatus};
use super::telemetry::{self, RegisterSample};
use super::tolerance::evaluate;
use super::transport::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors raised inside a case
#[derive(Error, Debug)]
pub enum CaseError {
    /// The link failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The run was cancelled while the case was in flight
    #[error("Interrupted")]
    Interrupted,

    /// The device rejected or ignored its configuration
    #[error("Setup failed: {0}")]
    Setup(String),

    /// A step could not be carried out
    #[error("Step failed: {0}")]
    Step(String),
}

impl CaseError {
    /// Whether the link is gone, which ends the run.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_connection_loss())
    }
}

/// Defaults a case falls back on when a step leaves them unspecified
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDefaults {
    /// Settle time for reads
    pub settle: Duration,
    /// Settle time for configuration commands
    pub config_settle: Duration,
    /// Tolerance fraction
    pub tolerance: f64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(500),
            config_settle: Duration::from_millis(1000),
            tolerance: 0.05,
        }
    }
}

/// Everything a running case may touch
pub struct CaseContext {
    channel: CommandChannel,
    cancel: CancellationToken,
    defaults: StepDefaults,
    recorded: Mutex<Vec<TestResult>>,
}

impl CaseContext {
    /// Create a context
    pub fn new(channel: CommandChannel, cancel: CancellationToken, defaults: StepDefaults) -> Self {
        Self {
            channel,
            cancel,
            defaults,
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Hand a result to the run as soon as it exists.
    ///
    /// Recorded results survive a later error or interrupt in the same case.
    pub fn record(&self, result: TestResult) {
        debug!(id = result.id(), status = %result.status(), "result recorded");
        self.recorded.lock().push(result);
    }

    /// Take every result recorded since the previous take.
    pub fn take_recorded(&self) -> Vec<TestResult> {
        std::mem::take(&mut *self.recorded.lock())
    }

    /// Step defaults
    pub fn defaults(&self) -> &StepDefaults {
        &self.defaults
    }

    /// Underlying channel
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// Mutable access to the channel, for teardown
    pub fn channel_mut(&mut self) -> &mut CommandChannel {
        &mut self.channel
    }

    /// Whether the run has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Exchange one command, unwinding at once if the run is cancelled.
    pub async fn send(&self, line: &str, settle: Duration) -> Result<CommandResponse, CaseError> {
        if self.cancel.is_cancelled() {
            return Err(CaseError::Interrupted);
        }
        let request = CommandRequest::new(line, settle);
        tokio::select! {
            () = self.cancel.cancelled() => Err(CaseError::Interrupted),
            response = self.channel.exchange(&request) => Ok(response?),
        }
    }

    /// Send a configuration command with the configuration settle time.
    pub async fn configure(&self, line: &str) -> Result<CommandResponse, CaseError> {
        self.send(line, self.defaults.config_settle).await
    }

    /// Wait while the device does its work.
    pub async fn observe(&self, duration: Duration) -> Result<(), CaseError> {
        debug!(secs = duration.as_secs_f64(), "observing");
        tokio::select! {
            () = self.cancel.cancelled() => Err(CaseError::Interrupted),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Issue a sampling command and extract `address` from its response.
    pub async fn sample(&self, line: &str, address: u32) -> Result<RegisterSample, CaseError> {
        let response = self.send(line, self.defaults.settle).await?;
        Ok(telemetry::sample(response.text(), address))
    }

    /// Issue one sampling command and extract several addresses from it.
    pub async fn sample_many(&self, line: &str, addresses: &[u32]) -> Result<Vec<RegisterSample>, CaseError> {
        let response = self.send(line, self.defaults.settle).await?;
        Ok(addresses
            .iter()
            .map(|a| telemetry::sample(response.text(), *a))
            .collect())
    }
}

/// A named, ordered sequence of steps producing one or more results
#[async_trait]
pub trait TestCase: Send + Sync {
    /// Identifier, e.g. `1.2`
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Run the case against the device.
    ///
    /// Results may be returned, or recorded on `ctx` as they are produced.
    /// The run keeps recorded results ahead of returned ones, and keeps them
    /// even when the case then fails.
    async fn execute(&self, ctx: &CaseContext) -> Result<Vec<TestResult>, CaseError>;
}

fn missing(sample: &RegisterSample) -> String {
    format!("no value for register {}", sample.address)
}

/// Turns sampled values into results for one checked condition
#[derive(Debug, Clone, Copy)]
pub struct Check<'a> {
    id: &'a str,
    name: &'a str,
}

impl<'a> Check<'a> {
    /// Check reported under `id` and `name`
    pub fn new(id: &'a str, name: &'a str) -> Self {
        Self { id, name }
    }

    fn result(&self, status: TestStatus, expected: String, actual: String) -> TestResult {
        TestResult::new(self.id, self.name, status, expected, actual)
    }

    fn inconclusive(&self, expected: String, sample: &RegisterSample) -> TestResult {
        self.result(TestStatus::Inconclusive, expected, missing(sample))
            .with_notes("expected telemetry not found in response")
    }

    /// `sample` lies within `tolerance` of `expected`.
    pub fn tolerance(&self, sample: &RegisterSample, expected: f64, tolerance: f64) -> TestResult {
        let wanted = format!("{expected} +/- {:.1}%", tolerance * 100.0);
        let Some(observed) = sample.value else {
            return self.inconclusive(wanted, sample);
        };
        let eval = evaluate(expected, observed as f64, tolerance);
        let status = if eval.within_tolerance {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        };
        self.result(status, wanted, observed.to_string())
            .with_notes(format!("deviation {:.2}%", eval.deviation_percent()))
    }

    /// `sample` equals `expected` exactly.
    pub fn exact(&self, sample: &RegisterSample, expected: i64) -> TestResult {
        let wanted = expected.to_string();
        let Some(observed) = sample.value else {
            return self.inconclusive(wanted, sample);
        };
        let status = if observed == expected {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        };
        self.result(status, wanted, observed.to_string())
    }

    /// Two samples of the same register are equal.
    pub fn unchanged(&self, first: &RegisterSample, second: &RegisterSample) -> TestResult {
        let wanted = "value unchanged".to_string();
        let (Some(a), Some(b)) = (first.value, second.value) else {
            let absent = if first.is_present() { second } else { first };
            return self.inconclusive(wanted, absent);
        };
        let status = if a == b { TestStatus::Pass } else { TestStatus::Fail };
        self.result(status, wanted, format!("{a} -> {b}"))
            .with_notes(format!("difference {}", b - a))
    }

    /// The second sample advanced past the first by about `expected`.
    pub fn delta(
        &self,
        first: &RegisterSample,
        second: &RegisterSample,
        expected: f64,
        tolerance: f64,
    ) -> TestResult {
        let wanted = format!("increase of {expected} +/- {:.1}%", tolerance * 100.0);
        let (Some(a), Some(b)) = (first.value, second.value) else {
            let absent = if first.is_present() { second } else { first };
            return self.inconclusive(wanted, absent);
        };
        let eval = evaluate(expected, (b - a) as f64, tolerance);
        let status = if eval.within_tolerance {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        };
        self.result(status, wanted, format!("{a} -> {b} ({:+})", b - a))
            .with_notes(format!("deviation {:.2}%", eval.deviation_percent()))
    }

    /// `sample` matches `unwrapped` folded into a `bits`-wide register.
    pub fn wrapped(&self, sample: &RegisterSample, unwrapped: i64, bits: u32, tolerance: f64) -> TestResult {
        let modulus = 1i64 << bits.clamp(1, 62);
        let expected = unwrapped.rem_euclid(modulus);
        let mut result = self.tolerance(sample, expected as f64, tolerance);
        if result.status() != TestStatus::Inconclusive {
            let notes = format!("{unwrapped} mod {modulus} = {expected}; {}", result.notes());
            result = result.with_notes(notes);
        }
        result
    }
}
