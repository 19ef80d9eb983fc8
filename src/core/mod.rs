//! Core module containing the test-orchestration engine
//!
//! This module provides:
//! - Transport layer with a background reader (Serial, TCP, simulated)
//! - Command/response exchange over the device console
//! - Telemetry extraction from register dumps and state listings
//! - Tolerance evaluation
//! - Test cases, declarative plans and the sequential runner
//! - Markdown/JSON report rendering
//! - Wire transcript recording
//! - Virtual device simulation

pub mod channel;
pub mod plan;
pub mod report;
pub mod result;
pub mod runner;
pub mod simulator;
pub mod telemetry;
pub mod testcase;
pub mod tolerance;
pub mod transcript;
pub mod transport;
