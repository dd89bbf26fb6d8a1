//! Configuration management.
//!
//! Settings come from an optional file plus `QUEUELINE__*` environment
//! variables, e.g. `QUEUELINE__WORKER__MAX_TRIES=5`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{QueueError, Result};
use crate::jobs::{JobOptions, WorkerConfig};
use crate::telemetry::LoggingConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "QUEUELINE";

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Queue backend configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Job execution options
    #[serde(default)]
    pub jobs: JobOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue used when a push names none
    #[serde(default = "default_queue")]
    pub default_queue: String,

    /// How long a reserved message stays invisible before redelivery
    #[serde(default = "default_retry_after", with = "humantime_serde")]
    pub retry_after: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_queue: default_queue(),
            retry_after: default_retry_after(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Emit checkpoints through the tracing monitor
    #[serde(default)]
    pub checkpoints: bool,
}

// Default value functions
fn default_queue() -> String { "default".to_string() }
fn default_retry_after() -> Duration { Duration::from_secs(90) }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.worker.queues.is_empty() {
            return Err(QueueError::configuration("worker.queues must name at least one queue"));
        }
        if self.worker.queues.iter().any(|q| q.trim().is_empty()) {
            return Err(QueueError::configuration("worker.queues must not contain empty names"));
        }
        if self.queue.default_queue.trim().is_empty() {
            return Err(QueueError::configuration("queue.default_queue must not be empty"));
        }
        if self.queue.retry_after.is_zero() {
            return Err(QueueError::configuration("queue.retry_after must be greater than zero"));
        }
        Ok(())
    }
}
