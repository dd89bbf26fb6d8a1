//! Queue job execution.
//!
//! This module provides everything between "a backend reserved a message"
//! and "the message was deleted, released, or dead-lettered":
//!
//! - **Payload**: decoding the raw body and splitting `Class@method` references
//! - **Job**: the per-dequeue state machine that resolves and fires handlers
//! - **Resolver**: turning handler class names into handler instances
//! - **Monitor**: best-effort start/finish checkpoints around each run
//! - **Queue**: in-memory and synchronous reference connections
//! - **Worker**: the poll loop with retry, backoff, and dead-lettering
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  pop   ┌──────────────┐  resolve  ┌──────────────┐
//! │    Queue     │───────▶│     Job      │──────────▶│   Handler    │
//! │ Connection   │        │ (state mach.)│◀──────────│ delete/release│
//! └──────────────┘        └──────┬───────┘           └──────────────┘
//!        ▲                       │ checkpoints
//!        │ release/delete        ▼
//!        │                ┌──────────────┐
//!        └────────────────│    Worker    │──▶ Dead letter queue
//!                         └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use queueline_core::jobs::{
//!     HandlerRegistry, InMemoryQueue, JobRuntime, QueueConnection, Worker, WorkerConfig,
//! };
//!
//! let registry = HandlerRegistry::new();
//! registry.register::<ReportMailer>("ReportMailer");
//!
//! let queue = InMemoryQueue::new();
//! queue.push("default", "ReportMailer@send", json!({"report": 7})).await?;
//!
//! let runtime = Arc::new(JobRuntime::new(Arc::new(registry)));
//! let worker = Worker::new(WorkerConfig::default(), runtime);
//! worker.run_next_job(&queue).await?;
//! ```

pub mod delay;
pub mod job;
pub mod monitor;
pub mod payload;
pub mod queue;
pub mod resolver;
pub mod worker;

pub use delay::{
    resolve_delay_seconds, BackoffStrategy, Clock, ManualClock, RetryDirective, SystemClock,
};
pub use job::{
    FireOutcome, Job, JobBackend, JobError, JobOptions, JobRuntime, JobStatus,
    MissingHandlerPolicy,
};
pub use monitor::{
    Checkpoint, CheckpointId, CheckpointMonitor, CheckpointStatus, InMemoryMonitor,
    MonitorHandle, TracingMonitor,
};
pub use payload::{
    job_name, monitor_slug, parse_handler_ref, HandlerRef, JobPayload, DEFAULT_METHOD,
    UNDEFINED_NAME,
};
pub use queue::{
    DeadLetterQueue, FailedJob, InMemoryJob, InMemoryQueue, QueueConnection, SyncQueue,
};
pub use resolver::{FnHandler, HandlerRegistry, HandlerResolver, HandlerResult, JobHandler};
pub use worker::{
    ProcessedJob, Worker, WorkerConfig, WorkerHandle, WorkerStats, WorkerStatsSnapshot,
};

// Built-in handlers
mod builtin;
pub use builtin::{register_builtin, FailingHandler, LogPayloadHandler, NoopHandler};
