//! Configuration structures for a simulation run.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for scripted runs. Rate validation
//! is fail-fast: a non-harmonic rate set is rejected here, before any
//! worker exists.

use crate::error::{LockstepError, LockstepResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Simulation horizon: the run ends once simulated time reaches it.
    #[serde(with = "humantime_serde")]
    pub horizon: Duration,

    /// Periodic tasks, slowest first by convention. The fastest entry
    /// becomes the rate master.
    pub tasks: Vec<TaskRate>,

    /// Scheduler pacing configuration.
    pub pacing: PacingConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(1),
            tasks: vec![
                TaskRate::new("planner", 100),
                TaskRate::new("controller", 200),
                TaskRate::new("dynamics", 400),
            ],
            pacing: PacingConfig::default(),
        }
    }
}

/// One task's declared rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRate {
    /// Task identifier, unique within the run.
    pub id: String,
    /// Execution frequency in Hertz.
    pub frequency_hz: u32,
}

impl TaskRate {
    /// Create a task rate entry.
    pub fn new(id: impl Into<String>, frequency_hz: u32) -> Self {
        Self {
            id: id.into(),
            frequency_hz,
        }
    }
}

/// How the scheduler and workers wait while idle.
///
/// Both strategies keep wake-up latency well under one base period;
/// neither ever blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdleStrategy {
    /// Spin-loop hint plus a thread yield per poll. Cheaper on shared
    /// machines, microseconds of extra latency.
    #[default]
    Yield,
    /// Pure busy spin. Lowest latency, burns a core per unit.
    Spin,
}

/// Scheduler pacing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PacingConfig {
    /// Idle-wait strategy for the scheduler and workers.
    pub idle: IdleStrategy,
}

/// Facts derived from a validated rate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSet {
    /// The fastest declared frequency.
    pub fastest_hz: u32,
    /// Index of the fastest task in the declared order.
    pub rate_master: usize,
    /// One period of the fastest rate; the tick length.
    pub base_period: Duration,
}

impl RateSet {
    /// Validate a frequency list and derive the base period.
    ///
    /// # Errors
    ///
    /// Rejects empty sets, zero frequencies, rate sets whose fastest
    /// frequency is not strictly the maximum, and any frequency that
    /// does not evenly divide the fastest.
    pub fn derive(frequencies: &[u32]) -> LockstepResult<Self> {
        if frequencies.is_empty() {
            return Err(LockstepError::Config("no tasks declared".into()));
        }
        if frequencies.iter().any(|&f| f == 0) {
            return Err(LockstepError::Config(
                "task frequency must be non-zero".into(),
            ));
        }

        let fastest_hz = *frequencies.iter().max().expect("non-empty");
        let rate_master = frequencies
            .iter()
            .position(|&f| f == fastest_hz)
            .expect("non-empty");

        for (idx, &f) in frequencies.iter().enumerate() {
            if idx != rate_master && f == fastest_hz {
                return Err(LockstepError::RateNotFastest {
                    frequency_hz: f,
                    fastest_hz,
                });
            }
            if fastest_hz % f != 0 {
                return Err(LockstepError::NonHarmonicRate {
                    frequency_hz: f,
                    fastest_hz,
                });
            }
        }

        Ok(Self {
            fastest_hz,
            rate_master,
            base_period: Duration::from_secs_f64(1.0 / f64::from(fastest_hz)),
        })
    }

    /// Dispatch ratio of a member frequency: how many base ticks per
    /// one of its periods.
    #[must_use]
    pub fn ratio_of(&self, frequency_hz: u32) -> u64 {
        u64::from(self.fastest_hz / frequency_hz)
    }
}

impl SimConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the declared rates and derive the rate set.
    ///
    /// # Errors
    ///
    /// See [`RateSet::derive`]; additionally rejects duplicate ids.
    pub fn validate(&self) -> LockstepResult<RateSet> {
        for (i, task) in self.tasks.iter().enumerate() {
            if self.tasks[..i].iter().any(|t| t.id == task.id) {
                return Err(LockstepError::Config(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }
        let freqs: Vec<u32> = self.tasks.iter().map(|t| t.frequency_hz).collect();
        RateSet::derive(&freqs)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
