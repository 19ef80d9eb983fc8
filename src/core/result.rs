//! Test results and the suite accumulator

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    /// Condition held
    Pass,
    /// Condition violated, or the case failed unexpectedly
    Fail,
    /// Expected telemetry could not be located
    Inconclusive,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Outcome of one checked condition. Never mutated once collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    id: String,
    name: String,
    status: TestStatus,
    expected: String,
    actual: String,
    notes: String,
    timestamp: DateTime<Local>,
}

impl TestResult {
    /// Create a result stamped with the current time
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        status: TestStatus,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
            expected: expected.into(),
            actual: actual.into(),
            notes: String::new(),
            timestamp: Local::now(),
        }
    }

    /// Attach notes
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    /// Identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Status
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Expected outcome, as text
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Observed outcome, as text
    pub fn actual(&self) -> &str {
        &self.actual
    }

    /// Free-text notes
    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Creation time
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RunCompletion {
    /// Every case was executed
    Completed,
    /// Stopped by an external interrupt
    Interrupted,
    /// The link dropped mid-run
    ConnectionLost(String),
}

impl RunCompletion {
    /// Whether every case had a chance to run
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Ordered results of one run plus derived aggregates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteReport {
    results: Vec<TestResult>,
    /// Run metadata (endpoint, start/end time, user keys)
    pub metadata: BTreeMap<String, String>,
    /// How the run ended
    pub completion: RunCompletion,
}

impl TestSuiteReport {
    /// Derive a report from the full accumulator
    pub fn new(results: Vec<TestResult>, completion: RunCompletion) -> Self {
        Self {
            results,
            metadata: BTreeMap::new(),
            completion,
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Results in execution order
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Number of results
    pub fn total(&self) -> usize {
        self.results.len()
    }

    /// Number of PASS results
    pub fn passed(&self) -> usize {
        self.count(TestStatus::Pass)
    }

    /// Number of FAIL results
    pub fn failed(&self) -> usize {
        self.count(TestStatus::Fail)
    }

    /// Number of INCONCLUSIVE results
    pub fn inconclusive(&self) -> usize {
        self.count(TestStatus::Inconclusive)
    }

    /// `passed / total`, or 0 for an empty report
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.passed() as f64 / self.total() as f64
    }

    /// Every result passed and the run was not cut short.
    /// An empty run has not passed anything.
    pub fn all_passed(&self) -> bool {
        !self.results.is_empty() && self.completion.is_complete() && self.passed() == self.total()
    }

    fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}
