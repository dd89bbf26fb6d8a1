//! Telemetry: structured logging and metric descriptions.
//!
//! - **Logging**: JSON/pretty/compact `tracing` output with per-module levels
//!   and redaction of sensitive job data
//! - **Metrics**: names and descriptions for the counters and histograms the
//!   job system records through the `metrics` facade
//!
//! # Example
//!
//! ```rust,no_run
//! use queueline_core::telemetry::{init_telemetry, LoggingConfig};
//!
//! init_telemetry(&LoggingConfig::default()).expect("Failed to initialize telemetry");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig, PayloadRedactor, RedactionConfig};
pub use self::metrics::describe_metrics;

/// Install the global subscriber and describe metrics.
pub fn init_telemetry(logging: &LoggingConfig) -> anyhow::Result<()> {
    init_logging(logging)?;
    describe_metrics();

    tracing::info!(
        format = ?logging.format,
        level = %logging.level,
        "Telemetry initialized"
    );
    Ok(())
}
