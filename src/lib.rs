//! # Pulsebench Core Library
//!
//! Test orchestration for embedded devices driven over a line-oriented
//! text console:
//! - Serial ports and raw TCP consoles
//! - Background-buffered transport with settle-window exchanges
//! - Register-dump and state-line telemetry parsing
//! - Tolerance-based evaluation with INCONCLUSIVE on missing data
//! - Sequential runner with per-case failure isolation
//! - Markdown and JSON reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use pulsebench_core::{counter_suite, BenchConfig, CounterPlan, ReportGenerator, RunnerConfig, TestRunner};
//! use pulsebench_core::core::transport::create_transport;
//! use pulsebench_core::core::testcase::TestCase;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BenchConfig::default();
//!     let cases: Vec<Box<dyn TestCase>> = counter_suite(&CounterPlan::default())
//!         .into_iter()
//!         .map(|c| Box::new(c) as Box<dyn TestCase>)
//!         .collect();
//!
//!     let runner = TestRunner::new(RunnerConfig::from_config(&config));
//!     let outcome = runner.run(create_transport(config.transport.clone()), &cases).await?;
//!
//!     ReportGenerator::default().write(&outcome.report, "TEST_RESULTS_REPORT.md".as_ref())?;
//!     std::process::exit(if outcome.all_passed() { 0 } else { 17 });
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{BenchConfig, ConfigError, LineEnding};
pub use crate::core::channel::{CommandChannel, CommandRequest, CommandResponse};
pub use crate::core::plan::{counter_suite, CounterPlan, ScriptedCase, Step, TestPlan};
pub use crate::core::report::{AcceptanceThresholds, ReportError, ReportGenerator, Verdict};
pub use crate::core::result::{RunCompletion, TestResult, TestStatus, TestSuiteReport};
pub use crate::core::runner::{RunOutcome, RunnerConfig, TestRunner};
pub use crate::core::telemetry::{extract, RegisterSample};
pub use crate::core::tolerance::{evaluate, Evaluation};
pub use crate::core::transport::{SerialConfig, TcpConfig, Transport, TransportError, TransportType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
