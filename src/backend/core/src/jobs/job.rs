//! The job state machine.
//!
//! This module provides the core abstractions for a dequeued message:
//!
//! - **JobBackend**: what a queue backend supplies for one message (raw body,
//!   attempt counter, release and delete mechanics)
//! - **Job**: the per-dequeue state machine that resolves the handler,
//!   invokes it, and tracks deletion and release
//! - **JobRuntime**: shared collaborators (resolver, optional monitor, clock)
//! - **FireOutcome**: what happened during `fire()`, returned instead of
//!   propagating handler failures

use async_trait::async_trait;
use futures::FutureExt;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::delay::{resolve_delay_seconds, Clock, RetryDirective, SystemClock};
use super::monitor::{CheckpointMonitor, CheckpointStatus, MonitorHandle};
use super::payload::{self, HandlerRef};
use super::resolver::{HandlerResolver, JobHandler};
use crate::error::{ErrorCode, QueueError, Result};
use crate::telemetry::metrics::{JOBS_FAILED_TOTAL, JOBS_FIRED_TOTAL, JOB_DURATION_SECONDS};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Dequeued, `fire()` not called yet
    Pending,
    /// Handler invocation in progress
    Running,
    /// Handler returned normally without deleting or releasing
    Completed,
    /// Resolution or invocation failed
    Failed,
    /// Deleted from the queue
    Deleted,
    /// Released back to the queue for a later attempt
    Released,
}

impl JobStatus {
    /// Check if the job has finished running.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Deleted => write!(f, "deleted"),
            Self::Released => write!(f, "released"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type returned by handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether this error is retryable
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
    /// Additional context
    pub context: Option<serde_json::Value>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
            context: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
            context: None,
        }
    }

    /// The handler has no method by this name.
    pub fn unknown_method(method: &str) -> Self {
        Self::fatal(format!("Handler has no method '{}'", method)).with_code("UNKNOWN_METHOD")
    }

    /// The handler panicked.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::retryable(format!("Handler panicked: {}", message.into())).with_code("PANIC")
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context.
    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<QueueError> for JobError {
    fn from(error: QueueError) -> Self {
        Self {
            message: error.to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
            context: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fire Outcome
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of [`Job::fire`].
#[derive(Debug)]
pub enum FireOutcome {
    /// The payload named no handler; nothing ran.
    Skipped,
    /// The handler returned normally.
    Completed,
    /// Resolution or invocation failed. The job is left as the handler left it.
    Failed { error: QueueError },
    /// The payload could not be used (malformed, or no handler under the
    /// reject policy).
    Rejected { error: QueueError },
    /// `fire()` had already been called on this job.
    AlreadyFired,
}

impl FireOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn error(&self) -> Option<&QueueError> {
        match self {
            Self::Failed { error } | Self::Rejected { error } => Some(error),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Rejected { .. } => "rejected",
            Self::AlreadyFired => "already_fired",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backend Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// What a queue backend supplies for one dequeued message.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Backend identifier for the message.
    fn job_id(&self) -> &str;

    /// The undecoded payload.
    fn raw_body(&self) -> &str;

    /// Durable count of how many times this message has been reserved.
    fn attempts(&self) -> u32;

    /// Make the message available again after `delay_secs`.
    async fn release(&mut self, delay_secs: i64) -> Result<()>;

    /// Remove the message from the queue.
    async fn delete(&mut self) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Runtime
// ═══════════════════════════════════════════════════════════════════════════════

/// How `fire()` treats a payload without a handler reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingHandlerPolicy {
    /// Return [`FireOutcome::Skipped`] without touching resolver or monitor.
    #[default]
    Skip,
    /// Return [`FireOutcome::Rejected`] so the worker can dead-letter it.
    Reject,
}

/// Options shared by every job of a runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub missing_handler: MissingHandlerPolicy,
}

/// Collaborators shared by every job a worker or backend produces.
#[derive(Clone)]
pub struct JobRuntime {
    resolver: Arc<dyn HandlerResolver>,
    monitor: MonitorHandle,
    clock: Arc<dyn Clock>,
    options: JobOptions,
}

impl JobRuntime {
    /// Create a runtime with the system clock and no monitor.
    pub fn new(resolver: Arc<dyn HandlerResolver>) -> Self {
        Self {
            resolver,
            monitor: MonitorHandle::default(),
            clock: Arc::new(SystemClock),
            options: JobOptions::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn CheckpointMonitor>) -> Self {
        self.monitor = MonitorHandle::new(Some(monitor));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }
}

impl fmt::Debug for JobRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRuntime")
            .field("monitor", &self.monitor)
            .field("clock", &self.clock)
            .field("options", &self.options)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job
// ═══════════════════════════════════════════════════════════════════════════════

/// One dequeued message on its way through a handler.
///
/// A `Job` lives for a single dequeue/processing cycle and is driven by one
/// task at a time. Attempt counts and redelivery scheduling belong to the
/// backend; the job only reports them.
pub struct Job {
    queue: String,
    backend: Box<dyn JobBackend>,
    runtime: Arc<JobRuntime>,
    instance: Option<Box<dyn JobHandler>>,
    handler: Option<HandlerRef>,
    status: JobStatus,
    deleted: bool,
    released_delay: Option<i64>,
}

impl Job {
    pub fn new(queue: impl Into<String>, backend: Box<dyn JobBackend>, runtime: Arc<JobRuntime>) -> Self {
        Self {
            queue: queue.into(),
            backend,
            runtime,
            instance: None,
            handler: None,
            status: JobStatus::Pending,
            deleted: false,
            released_delay: None,
        }
    }

    /// Resolve the handler named in the payload and run it.
    ///
    /// Never fails: resolution errors, handler errors and handler panics are
    /// logged, reported to the monitor, and returned as
    /// [`FireOutcome::Failed`].
    pub async fn fire(&mut self) -> FireOutcome {
        if self.status != JobStatus::Pending {
            tracing::warn!(queue = %self.queue, job_id = %self.job_id(), status = %self.status, "Job already fired");
            return FireOutcome::AlreadyFired;
        }

        let payload = match payload::decode(self.backend.raw_body()) {
            Ok(payload) => payload,
            Err(error) if error.code() == ErrorCode::MissingHandlerRef => {
                return match self.runtime.options.missing_handler {
                    MissingHandlerPolicy::Skip => {
                        tracing::debug!(queue = %self.queue, job_id = %self.job_id(), "Payload names no handler, skipping");
                        FireOutcome::Skipped
                    }
                    MissingHandlerPolicy::Reject => self.reject(error),
                };
            }
            Err(error) => return self.reject(error),
        };

        let handler = payload.handler();
        let slug = payload::monitor_slug(&payload.handler_ref);
        let attempt = self.attempts();
        self.status = JobStatus::Running;
        self.handler = Some(handler.clone());

        let span = tracing::info_span!(
            "job",
            queue = %self.queue,
            job = %payload.handler_ref,
            job_id = %self.job_id(),
            attempt
        );

        let monitor = self.runtime.monitor.clone();
        let checkpoint = monitor.start(&slug);
        let started = Instant::now();

        let result = self
            .resolve_and_invoke(&handler, payload.data)
            .instrument(span.clone())
            .await;

        histogram!(JOB_DURATION_SECONDS, "queue" => self.queue.clone())
            .record(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(()) => {
                monitor.complete(checkpoint, &slug, CheckpointStatus::Ok);
                self.status = self.settled(JobStatus::Completed);
                span.in_scope(|| tracing::info!(status = %self.status, "Job finished"));
                FireOutcome::Completed
            }
            Err(error) => {
                monitor.complete(checkpoint, &slug, CheckpointStatus::Error);
                self.status = self.settled(JobStatus::Failed);
                counter!(
                    JOBS_FAILED_TOTAL,
                    "queue" => self.queue.clone(),
                    "code" => error.code().to_string()
                )
                .increment(1);
                span.in_scope(|| {
                    tracing::error!(
                        status = %self.status,
                        error_code = %error.code(),
                        error = %error,
                        "Job failed"
                    )
                });
                FireOutcome::Failed { error }
            }
        };

        counter!(
            JOBS_FIRED_TOTAL,
            "queue" => self.queue.clone(),
            "outcome" => outcome.label()
        )
        .increment(1);

        outcome
    }

    async fn resolve_and_invoke(&mut self, handler: &HandlerRef, data: Value) -> Result<()> {
        let resolver = Arc::clone(&self.runtime.resolver);
        let instance = match catch_unwind(AssertUnwindSafe(|| resolver.resolve(&handler.class))) {
            Ok(resolved) => resolved?,
            Err(panic) => {
                return Err(QueueError::resolution_failed(
                    handler.class.clone(),
                    panic_message(panic.as_ref()),
                ))
            }
        };

        let invoked = AssertUnwindSafe(instance.handle(&handler.method, self, data))
            .catch_unwind()
            .await;
        self.instance = Some(instance);

        match invoked {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(QueueError::handler_failed(handler.to_string(), error)),
            Err(panic) => Err(QueueError::handler_failed(
                handler.to_string(),
                JobError::panicked(panic_message(panic.as_ref())),
            )),
        }
    }

    fn reject(&mut self, error: QueueError) -> FireOutcome {
        self.status = JobStatus::Failed;
        tracing::error!(
            queue = %self.queue,
            job_id = %self.job_id(),
            error_code = %error.code(),
            error = %error,
            "Rejected unusable job payload"
        );
        counter!(
            JOBS_FIRED_TOTAL,
            "queue" => self.queue.clone(),
            "outcome" => "rejected"
        )
        .increment(1);
        FireOutcome::Rejected { error }
    }

    /// Deleted and released take precedence over how the handler returned.
    fn settled(&self, fallback: JobStatus) -> JobStatus {
        if self.deleted {
            JobStatus::Deleted
        } else if self.released_delay.is_some() {
            JobStatus::Released
        } else {
            fallback
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Finalization
    // ─────────────────────────────────────────────────────────────────────────

    /// Delete the job from the queue. Repeated calls are no-ops.
    ///
    /// The deleted flag is set even if the backend fails to remove the
    /// message; the error is returned so the caller can log it.
    pub async fn delete(&mut self) -> Result<()> {
        if self.deleted {
            return Ok(());
        }

        self.deleted = true;
        if self.status != JobStatus::Running {
            self.status = JobStatus::Deleted;
        }

        self.backend.delete().await?;
        tracing::debug!(queue = %self.queue, job_id = %self.job_id(), "Job deleted");
        Ok(())
    }

    /// Release the job back onto the queue. Returns the resolved delay.
    pub async fn release(&mut self, delay: impl Into<RetryDirective>) -> Result<i64> {
        let directive = delay.into();
        let delay_secs = resolve_delay_seconds(directive, self.runtime.clock.now());

        self.backend.release(delay_secs).await?;
        self.released_delay = Some(delay_secs);
        if self.status != JobStatus::Running {
            self.status = JobStatus::Released;
        }

        tracing::debug!(
            queue = %self.queue,
            job_id = %self.job_id(),
            %directive,
            delay_secs,
            "Job released"
        );
        Ok(delay_secs)
    }

    /// Release the job for immediate redelivery.
    pub async fn release_now(&mut self) -> Result<i64> {
        self.release(RetryDirective::default()).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_released(&self) -> bool {
        self.released_delay.is_some()
    }

    /// Delay in seconds of the last successful release.
    pub fn released_delay(&self) -> Option<i64> {
        self.released_delay
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Attempt count as reported by the backend.
    pub fn attempts(&self) -> u32 {
        self.backend.attempts()
    }

    pub fn raw_body(&self) -> &str {
        self.backend.raw_body()
    }

    pub fn job_id(&self) -> &str {
        self.backend.job_id()
    }

    /// Handler reference from the payload, or `"(undefined)"`.
    pub fn name(&self) -> String {
        payload::job_name(self.backend.raw_body())
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Whether the resolved handler asked to be deleted after success.
    /// False until a handler has been resolved.
    pub fn auto_delete(&self) -> bool {
        self.instance.as_ref().is_some_and(|h| h.auto_delete())
    }

    /// The handler reference parsed during `fire()`.
    pub fn resolved_handler(&self) -> Option<&HandlerRef> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("queue", &self.queue)
            .field("job_id", &self.job_id())
            .field("status", &self.status)
            .field("deleted", &self.deleted)
            .field("released_delay", &self.released_delay)
            .field("attempts", &self.attempts())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
