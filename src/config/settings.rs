//! Bench settings

use super::ConfigError;
use crate::core::plan::CounterPlan;
use crate::core::report::AcceptanceThresholds;
use crate::core::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bench configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Endpoint of the device under test
    pub transport: Transport,
    /// Command exchange timing
    pub channel: ChannelConfig,
    /// Default evaluation settings
    pub evaluation: EvaluationConfig,
    /// Verdict thresholds on the success rate
    pub acceptance: AcceptanceThresholds,
    /// Report output
    pub report: ReportConfig,
    /// Run pacing and plan selection
    pub run: RunConfig,
    /// Parameters of the built-in counter suite
    pub counter: CounterPlan,
}

impl BenchConfig {
    /// Load config from file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Transport::Serial(serial) = &self.transport {
            if serial.port.trim().is_empty() {
                return Err(ConfigError::Invalid("serial port name is empty".into()));
            }
            if serial.baud_rate == 0 {
                return Err(ConfigError::Invalid("baud rate must be positive".into()));
            }
        }
        if !(self.evaluation.tolerance > 0.0 && self.evaluation.tolerance.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be a positive fraction, got {}",
                self.evaluation.tolerance
            )));
        }
        let AcceptanceThresholds { accept, conditional } = self.acceptance;
        if !(0.0..=1.0).contains(&accept) || !(0.0..=1.0).contains(&conditional) {
            return Err(ConfigError::Invalid("acceptance thresholds must lie in [0, 1]".into()));
        }
        if accept < conditional {
            return Err(ConfigError::Invalid(format!(
                "accept threshold {accept} is below conditional threshold {conditional}"
            )));
        }
        if self.channel.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be at least 1 ms".into()));
        }
        Ok(())
    }
}

/// Line ending type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Carriage Return only
    Cr,
    /// Line Feed only
    Lf,
    /// Both CR and LF
    #[default]
    CrLf,
}

impl LineEnding {
    /// Get the byte sequence for this line ending
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Self::Cr => b"\r",
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
        }
    }
}

/// Command exchange timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Terminator appended to every command
    pub line_ending: LineEnding,
    /// Settle time for reads, in milliseconds
    pub settle_ms: u64,
    /// Settle time for configuration commands, in milliseconds
    pub config_settle_ms: u64,
    /// Background reader poll interval, in milliseconds
    pub poll_interval_ms: u64,
}

impl ChannelConfig {
    /// Settle time for reads
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Settle time for configuration commands
    pub fn config_settle(&self) -> Duration {
        Duration::from_millis(self.config_settle_ms)
    }

    /// Background reader poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            line_ending: LineEnding::CrLf,
            settle_ms: 500,
            config_settle_ms: 1000,
            poll_interval_ms: 10,
        }
    }
}

/// Default evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Tolerance fraction used when a check does not name one
    pub tolerance: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { tolerance: 0.05 }
    }
}

/// Report output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Markdown report path
    pub path: PathBuf,
    /// Optional JSON export path
    pub json_path: Option<PathBuf>,
    /// Report title
    pub title: String,
    /// Free-form run metadata (firmware build, hardware, signal source)
    pub metadata: BTreeMap<String, String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("TEST_RESULTS_REPORT.md"),
            json_path: None,
            title: "Device Validation Report".to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Run pacing and plan selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Wait after opening before the first case, in milliseconds
    pub startup_delay_ms: u64,
    /// Pause between cases, in milliseconds
    pub inter_case_delay_ms: u64,
    /// Test plan file; the built-in counter suite runs when unset
    pub plan: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 1000,
            inter_case_delay_ms: 2000,
            plan: None,
        }
    }
}
