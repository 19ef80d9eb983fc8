//! Configuration module
//!
//! Handles bench settings: endpoint, exchange timing, tolerances,
//! acceptance thresholds and report output

mod settings;

pub use settings::{
    BenchConfig, ChannelConfig, EvaluationConfig, LineEnding, ReportConfig, RunConfig,
};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        /// Offending file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for the expected shape
    #[error("Cannot parse {}: {message}", path.display())]
    Parse {
        /// Offending file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Values are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "pulsebench", "Pulsebench").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default location of the bench configuration file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("pulsebench.toml"))
}
