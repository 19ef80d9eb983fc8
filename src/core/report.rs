//! Report rendering
//!
//! Renders a [`TestSuiteReport`] as a Markdown document: header with run
//! metadata, summary table, one block per result and a closing verdict.
//! A JSON export of the same report is available for tooling.

use super::result::{RunCompletion, TestStatus, TestSuiteReport};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Report writing errors
#[derive(Error, Debug)]
pub enum ReportError {
    /// Artifact could not be written
    #[error("Cannot write report {}: {source}", path.display())]
    Io {
        /// Target file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Report could not be serialized
    #[error("Cannot serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Success-rate thresholds behind the verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceThresholds {
    /// Rate at or above which the run is accepted
    pub accept: f64,
    /// Rate at or above which the run is accepted with reservations
    pub conditional: f64,
}

impl Default for AcceptanceThresholds {
    fn default() -> Self {
        Self {
            accept: 0.90,
            conditional: 0.75,
        }
    }
}

/// Closing verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Success rate reached the accept threshold
    Accepted,
    /// Success rate reached the conditional threshold only
    ConditionallyAccepted,
    /// Anything else, including runs cut short
    Rejected,
}

impl Verdict {
    /// Verdict for a report under `thresholds`
    pub fn of(report: &TestSuiteReport, thresholds: &AcceptanceThresholds) -> Self {
        if !report.completion.is_complete() || report.total() == 0 {
            return Self::Rejected;
        }
        let rate = report.success_rate();
        if rate >= thresholds.accept {
            Self::Accepted
        } else if rate >= thresholds.conditional {
            Self::ConditionallyAccepted
        } else {
            Self::Rejected
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::ConditionallyAccepted => write!(f, "ACCEPTED WITH RESERVATIONS"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

/// Markdown report generator
#[derive(Debug, Clone)]
pub struct ReportGenerator {
    title: String,
    thresholds: AcceptanceThresholds,
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new("Device Validation Report", AcceptanceThresholds::default())
    }
}

impl ReportGenerator {
    /// Create a generator
    pub fn new(title: impl Into<String>, thresholds: AcceptanceThresholds) -> Self {
        Self {
            title: title.into(),
            thresholds,
        }
    }

    /// Verdict this generator would print for `report`
    pub fn verdict(&self, report: &TestSuiteReport) -> Verdict {
        Verdict::of(report, &self.thresholds)
    }

    /// Render the report as Markdown. Never fails, even when empty.
    pub fn render(&self, report: &TestSuiteReport) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render_into(&mut out, report);
        out
    }

    fn render_into(&self, out: &mut String, report: &TestSuiteReport) -> fmt::Result {
        let total = report.total();

        writeln!(out, "# {}", self.title)?;
        writeln!(out)?;
        for (key, value) in &report.metadata {
            writeln!(out, "**{key}:** {value}  ")?;
        }
        writeln!(out)?;
        writeln!(out, "---")?;
        writeln!(out)?;

        writeln!(out, "## Summary")?;
        writeln!(out)?;
        writeln!(out, "| Metric | Value |")?;
        writeln!(out, "|--------|-------|")?;
        writeln!(out, "| **Total Tests** | {total} |")?;
        writeln!(out, "| **Passed** | {} ({:.1}%) |", report.passed(), percent(report.passed(), total))?;
        writeln!(out, "| **Failed** | {} ({:.1}%) |", report.failed(), percent(report.failed(), total))?;
        writeln!(
            out,
            "| **Inconclusive** | {} ({:.1}%) |",
            report.inconclusive(),
            percent(report.inconclusive(), total)
        )?;
        writeln!(out, "| **Success Rate** | {:.1}% |", report.success_rate() * 100.0)?;
        writeln!(out)?;

        match &report.completion {
            RunCompletion::Completed => {}
            RunCompletion::Interrupted => {
                writeln!(out, "> **Run interrupted.** Remaining cases were not executed.")?;
                writeln!(out)?;
            }
            RunCompletion::ConnectionLost(reason) => {
                writeln!(out, "> **Connection lost:** {reason}. Remaining cases were not executed.")?;
                writeln!(out)?;
            }
        }

        writeln!(out, "---")?;
        writeln!(out)?;
        writeln!(out, "## Detailed Results")?;
        writeln!(out)?;
        if total == 0 {
            writeln!(out, "_No tests executed._")?;
            writeln!(out)?;
        }
        for result in report.results() {
            let tag = match result.status() {
                TestStatus::Pass => "[PASS]",
                TestStatus::Fail => "[FAIL]",
                TestStatus::Inconclusive => "[INCONCLUSIVE]",
            };
            writeln!(out, "### Test {}: {}", result.id(), result.name())?;
            writeln!(out)?;
            writeln!(out, "**Status:** {tag} {}  ", result.status())?;
            writeln!(out, "**Expected:** {}  ", result.expected())?;
            writeln!(out, "**Actual:** {}  ", result.actual())?;
            if !result.notes().is_empty() {
                writeln!(out, "**Notes:** {}  ", result.notes())?;
            }
            writeln!(out, "**Timestamp:** {}", result.timestamp().format("%Y-%m-%d %H:%M:%S"))?;
            writeln!(out)?;
        }

        writeln!(out, "---")?;
        writeln!(out)?;
        writeln!(out, "## Verdict")?;
        writeln!(out)?;
        writeln!(
            out,
            "**{}** (accept at {:.0}%, conditional at {:.0}%)",
            self.verdict(report),
            self.thresholds.accept * 100.0,
            self.thresholds.conditional * 100.0
        )?;
        Ok(())
    }

    /// Render and write the Markdown artifact.
    pub fn write(&self, report: &TestSuiteReport, path: &Path) -> Result<(), ReportError> {
        std::fs::write(path, self.render(report)).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, report: &TestSuiteReport, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(path, json).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
