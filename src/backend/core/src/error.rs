//! Error handling for Queueline Core.
//!
//! This module provides:
//! - A single crate error type with a machine-readable [`ErrorCode`]
//! - User-facing messages vs detailed internal messages
//! - Severity-mapped logging with tracing integration
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use queueline_core::error::{QueueError, Result, ErrorContext, ErrorCode};
//!
//! fn load(raw: &str) -> Result<serde_json::Value> {
//!     serde_json::from_str(raw).with_error_code(ErrorCode::MalformedPayload)
//! }
//! ```

use metrics::{counter, Label};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use crate::telemetry::metrics::ERRORS_TOTAL;

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be matched on by workers and backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Payload Errors (1000-1099)
    MalformedPayload,
    MissingHandlerRef,

    // Dispatch Errors (1100-1199)
    ResolutionFailed,
    HandlerExecutionFailed,

    // Backend Errors (2000-2099)
    ReleaseFailed,
    DeleteFailed,
    QueueNotFound,
    BackendError,

    // Serialization Errors (2200-2299)
    SerializationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::MalformedPayload => 1000,
            Self::MissingHandlerRef => 1001,

            Self::ResolutionFailed => 1100,
            Self::HandlerExecutionFailed => 1101,

            Self::ReleaseFailed => 2000,
            Self::DeleteFailed => 2001,
            Self::QueueNotFound => 2002,
            Self::BackendError => 2003,

            Self::SerializationError => 2200,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Check if an error with this code may succeed on a later attempt.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HandlerExecutionFailed
                | Self::ReleaseFailed
                | Self::DeleteFailed
                | Self::BackendError
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "payload",
            1100..=1199 => "dispatch",
            2000..=2099 => "backend",
            2200..=2299 => "serialization",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Bad input (malformed payloads, unknown handlers)
    Low,
    /// Job-level failures the worker can recover from
    Medium,
    /// Backend failures that affect delivery guarantees
    High,
    /// Broken process state
    Critical,
}

impl ErrorSeverity {
    /// Determine severity from error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::MalformedPayload
            | ErrorCode::MissingHandlerRef
            | ErrorCode::ResolutionFailed
            | ErrorCode::QueueNotFound => Self::Low,

            ErrorCode::HandlerExecutionFailed | ErrorCode::SerializationError => Self::Medium,

            ErrorCode::ReleaseFailed
            | ErrorCode::DeleteFailed
            | ErrorCode::BackendError
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details attached to an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// The queue involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// The handler reference involved, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    /// Suggested delay before retrying
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    /// Arbitrary structured context
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the queue name.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Attach the handler reference.
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// Add a context value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Queueline Core.
#[derive(Error, Debug)]
pub struct QueueError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Short description, safe to show to operators
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl QueueError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        // A handler's own verdict wins over the code default.
        if let Some(job_error) = self
            .source
            .as_deref()
            .and_then(|source| source.downcast_ref::<crate::jobs::JobError>())
        {
            return job_error.retryable;
        }
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Metrics
    // ─────────────────────────────────────────────────────────────────────────

    /// Labels for `ERRORS_TOTAL`. Only fields fixed at construction go in,
    /// the source is attached afterwards.
    fn metric_labels(&self) -> Vec<Label> {
        vec![
            Label::new("code", self.code.to_string()),
            Label::new("category", self.code.category().to_string()),
            Label::new("severity", format!("{:?}", self.severity())),
        ]
    }

    fn record_metrics(&self) {
        counter!(ERRORS_TOTAL, self.metric_labels()).increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to results.
pub trait ErrorContext<T> {
    /// Wrap the error as an internal error with the given message.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error with a specific error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| QueueError::internal(message).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| QueueError::with_internal(code, code.to_string(), e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| QueueError::internal(message))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| QueueError::new(code, code.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// External Error Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        let (code, user_msg) = if error.is_syntax() || error.is_eof() || error.is_data() {
            (ErrorCode::MalformedPayload, "Job payload is not valid JSON")
        } else {
            (ErrorCode::SerializationError, "Failed to serialize job payload")
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

impl From<std::io::Error> for QueueError {
    fn from(error: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::InternalError, "I/O error", error.to_string())
            .with_source(error)
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(error: anyhow::Error) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An unexpected error occurred",
            format!("{:#}", error),
        )
    }
}

impl From<config::ConfigError> for QueueError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => {
                (ErrorCode::ConfigurationError, "Configuration source not found")
            }
            config::ConfigError::PathParse(_)
            | config::ConfigError::FileParse { .. }
            | config::ConfigError::Type { .. } => {
                (ErrorCode::InvalidConfiguration, "Configuration is invalid")
            }
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl QueueError {
    /// The raw job body could not be parsed as a JSON object.
    pub fn malformed_payload(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::MalformedPayload,
            "Job payload is not a JSON object",
            reason,
        )
    }

    /// The payload parsed but carries no usable `job` field.
    pub fn missing_handler_ref() -> Self {
        Self::new(
            ErrorCode::MissingHandlerRef,
            "Job payload has no handler reference",
        )
    }

    /// The handler class could not be resolved.
    pub fn resolution_failed(class: impl Into<String>, reason: impl Into<String>) -> Self {
        let class = class.into();
        Self::with_internal(
            ErrorCode::ResolutionFailed,
            format!("Unable to resolve job handler: {}", class),
            reason,
        )
        .with_details(ErrorDetails::new().with_handler(class))
    }

    /// The handler ran and reported a failure.
    pub fn handler_failed(handler: impl Into<String>, error: crate::jobs::JobError) -> Self {
        let handler = handler.into();
        Self::with_internal(
            ErrorCode::HandlerExecutionFailed,
            format!("Job handler failed: {}", handler),
            error.to_string(),
        )
        .with_details(ErrorDetails::new().with_handler(handler))
        .with_source(error)
    }

    /// The backend could not make the message available again.
    pub fn release_failed(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        let queue = queue.into();
        Self::with_internal(
            ErrorCode::ReleaseFailed,
            format!("Failed to release job back onto queue: {}", queue),
            reason,
        )
        .with_details(ErrorDetails::new().with_queue(queue))
    }

    /// The backend could not remove the message.
    pub fn delete_failed(queue: impl Into<String>, reason: impl Into<String>) -> Self {
        let queue = queue.into();
        Self::with_internal(
            ErrorCode::DeleteFailed,
            format!("Failed to delete job from queue: {}", queue),
            reason,
        )
        .with_details(ErrorDetails::new().with_queue(queue))
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
