#![allow(clippy::result_large_err)]
//! # Queueline Core
//!
//! Queue job execution with at-least-once delivery semantics.
//!
//! ## Architecture
//!
//! - **Jobs**: payload decoding, handler resolution, and the per-dequeue job
//!   state machine (fire, delete, release)
//! - **Monitoring**: optional start/finish checkpoints keyed by handler slug
//! - **Queues**: in-memory and synchronous reference connections with a
//!   bounded dead letter queue
//! - **Worker**: poll loop with retry backoff and max-tries enforcement
//! - **Telemetry**: structured logging and metric descriptions
//! - **Config**: file and environment driven settings

pub mod config;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, QueueError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, QueueError, Result};
    pub use crate::jobs::{
        BackoffStrategy, CheckpointMonitor, CheckpointStatus, DeadLetterQueue, FireOutcome,
        FnHandler, HandlerRegistry, HandlerResolver, HandlerResult, InMemoryMonitor, InMemoryQueue,
        Job, JobBackend, JobError, JobHandler, JobOptions, JobRuntime, JobStatus,
        MissingHandlerPolicy, QueueConnection, RetryDirective, SyncQueue, TracingMonitor, Worker,
        WorkerConfig,
    };
    pub use crate::telemetry::{init_telemetry, LoggingConfig};
}
