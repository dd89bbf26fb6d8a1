//! Structured logging with JSON/pretty/compact formats and payload redaction.
//!
//! - JSON format for production environments
//! - Pretty format for development
//! - Per-module log level configuration
//! - Redaction of sensitive keys in job data before it is logged

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Global redactor instance for job data.
static REDACTOR: OnceLock<PayloadRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty or compact)
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Log a line when each job span closes
    #[serde(default)]
    pub span_close_events: bool,

    /// Redaction configuration
    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: false,
            include_target: default_include_target(),
            span_close_events: false,
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production/structured logging
    #[default]
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Configuration for redacting job data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionConfig {
    /// Whether redaction is enabled
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    /// Object keys whose values are replaced (case-insensitive substring match)
    #[serde(default = "default_redacted_fields")]
    pub field_names: Vec<String>,

    /// Replacement text for redacted values
    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            field_names: default_redacted_fields(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// Masks sensitive values inside job data.
#[derive(Debug, Clone)]
pub struct PayloadRedactor {
    field_names: Vec<String>,
    replacement: String,
    enabled: bool,
}

impl PayloadRedactor {
    pub fn new(config: &RedactionConfig) -> Self {
        Self {
            field_names: config.field_names.iter().map(|s| s.to_lowercase()).collect(),
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    /// Check if a key should be redacted.
    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let lower = field_name.to_lowercase();
        self.field_names.iter().any(|f| lower.contains(f.as_str()))
    }

    /// Copy of `data` with every sensitive key masked, at any depth.
    pub fn redact(&self, data: &Value) -> Value {
        if !self.enabled {
            return data.clone();
        }

        match data {
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| {
                        let value = if self.should_redact_field(key) {
                            Value::String(self.replacement.clone())
                        } else {
                            self.redact(value)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.redact(item)).collect()),
            other => other.clone(),
        }
    }

    /// The redactor installed by [`init_logging`], or the default one.
    pub fn global() -> &'static PayloadRedactor {
        REDACTOR.get_or_init(|| PayloadRedactor::new(&RedactionConfig::default()))
    }
}

// Default value functions
fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_target() -> bool {
    true
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redacted_fields() -> Vec<String> {
    ["password", "secret", "token", "api_key", "authorization", "credential"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Initialize the logging subsystem.
///
/// # Errors
///
/// Returns an error if a level directive does not parse or a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let _ = REDACTOR.set(PayloadRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(directive.parse()?);
    }

    let span_events = if config.span_close_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()?;

    Ok(())
}
