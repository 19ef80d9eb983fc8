//! CLI Exit Codes
//!
//! Exit codes of the bench runner, stable for CI pipelines.

use crate::config::ConfigError;
use crate::core::result::RunCompletion;
use crate::core::runner::RunOutcome;
use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Every test passed
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Endpoint could not be opened, or the link dropped mid-run
    pub const CONNECTION_FAILED: u8 = 3;

    /// Connection timeout
    pub const TIMEOUT: u8 = 4;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration or plan error
    pub const CONFIG_ERROR: u8 = 8;

    /// Run interrupted
    pub const CANCELLED: u8 = 11;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// At least one test did not pass
    pub const VALIDATION_FAILED: u8 = 17;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;

    /// Every code, in ascending order
    pub const ALL: [u8; 12] = [0, 1, 2, 3, 4, 6, 7, 8, 11, 14, 17, 127];
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Success with a message
    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Connection failure
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::CONNECTION_FAILED, msg.into())
    }

    /// Configuration failure
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Error(ExitCodes::CONFIG_ERROR, msg.into())
    }

    /// Map a finished run onto an exit code.
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let report = &outcome.report;
        match outcome.completion() {
            RunCompletion::Interrupted => Self::Error(
                ExitCodes::CANCELLED,
                format!("Run interrupted after {} results", report.total()),
            ),
            RunCompletion::ConnectionLost(reason) => {
                Self::Error(ExitCodes::CONNECTION_FAILED, format!("Connection lost: {reason}"))
            }
            RunCompletion::Completed if outcome.all_passed() => {
                Self::success_with_message(format!("All {} tests passed", report.total()))
            }
            RunCompletion::Completed => Self::Error(
                ExitCodes::VALIDATION_FAILED,
                format!(
                    "{} of {} tests passed ({} failed, {} inconclusive)",
                    report.passed(),
                    report.total(),
                    report.failed(),
                    report.inconclusive()
                ),
            ),
        }
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::PortNotFound(_) => ExitCodes::PORT_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::Timeout(_) => ExitCodes::TIMEOUT,
            TransportError::InvalidConfiguration(_) => ExitCodes::CONFIG_ERROR,
            _ => ExitCodes::CONNECTION_FAILED,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        let code = match &err {
            ConfigError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ExitCodes::FILE_NOT_FOUND
            }
            _ => ExitCodes::CONFIG_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "All tests passed",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed or lost",
        4 => "Connection timeout",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        11 => "Run interrupted",
        14 => "Port not found",
        17 => "Validation failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in ExitCodes::ALL {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::result::{TestResult, TestStatus, TestSuiteReport};
    use crate::core::transport::TransportStats;

    fn outcome(statuses: &[TestStatus], completion: RunCompletion) -> RunOutcome {
        let results = statuses
            .iter()
            .map(|s| TestResult::new("1.1", "case", *s, "x", "x"))
            .collect();
        RunOutcome {
            report: TestSuiteReport::new(results, completion),
            stats: TransportStats::default(),
        }
    }

    #[test]
    fn test_cli_result() {
        let success = CliResult::success();
        assert!(success.is_success());
        assert_eq!(success.code(), 0);

        let error = CliResult::error(3, "Connection failed");
        assert!(!error.is_success());
        assert_eq!(error.code(), 3);
        assert_eq!(error.message(), Some("Connection failed"));
    }

    #[test]
    fn test_outcome_codes() {
        let all_pass = outcome(&[TestStatus::Pass, TestStatus::Pass], RunCompletion::Completed);
        assert_eq!(CliResult::from_outcome(&all_pass).code(), ExitCodes::SUCCESS);

        let inconclusive = outcome(&[TestStatus::Pass, TestStatus::Inconclusive], RunCompletion::Completed);
        assert_eq!(CliResult::from_outcome(&inconclusive).code(), ExitCodes::VALIDATION_FAILED);

        let empty = outcome(&[], RunCompletion::Completed);
        assert_eq!(CliResult::from_outcome(&empty).code(), ExitCodes::VALIDATION_FAILED);

        let interrupted = outcome(&[TestStatus::Pass], RunCompletion::Interrupted);
        assert_eq!(CliResult::from_outcome(&interrupted).code(), ExitCodes::CANCELLED);

        let lost = outcome(&[TestStatus::Fail], RunCompletion::ConnectionLost("Disconnected".into()));
        assert_eq!(CliResult::from_outcome(&lost).code(), ExitCodes::CONNECTION_FAILED);
    }

    #[test]
    fn test_from_errors() {
        assert_eq!(
            CliResult::from(TransportError::PortNotFound("COM11".into())).code(),
            ExitCodes::PORT_NOT_FOUND
        );
        assert_eq!(
            CliResult::from(TransportError::ConnectionFailed("refused".into())).code(),
            ExitCodes::CONNECTION_FAILED
        );
        assert_eq!(
            CliResult::from(ConfigError::Invalid("bad".into())).code(),
            ExitCodes::CONFIG_ERROR
        );
    }

    #[test]
    fn test_every_code_described() {
        for code in ExitCodes::ALL {
            assert_ne!(exit_code_description(code), "Unknown error");
        }
    }
}
