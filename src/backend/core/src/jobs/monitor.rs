//! Monitoring checkpoints around job execution.
//!
//! A monitor receives an in-progress checkpoint when a job starts and an
//! ok/error checkpoint when it finishes, keyed by the handler's slug. Monitors
//! are optional and strictly best-effort: [`MonitorHandle`] swallows their
//! errors and panics so they can never change a job's outcome.

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::telemetry::metrics::CHECKPOINTS_TOTAL;

/// Identifies one start/complete checkpoint pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status carried by a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Ok,
    Error,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of job execution checkpoints.
///
/// Implementations should return quickly; they run inline with the job.
pub trait CheckpointMonitor: Send + Sync {
    /// Record that a job for `slug` started.
    fn start_checkpoint(&self, slug: &str) -> Result<CheckpointId>;

    /// Record how the job for `slug` finished.
    fn complete_checkpoint(
        &self,
        id: CheckpointId,
        slug: &str,
        status: CheckpointStatus,
    ) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Monitor Handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Optional monitor wrapper that never fails.
#[derive(Clone, Default)]
pub struct MonitorHandle {
    monitor: Option<Arc<dyn CheckpointMonitor>>,
}

impl MonitorHandle {
    pub fn new(monitor: Option<Arc<dyn CheckpointMonitor>>) -> Self {
        Self { monitor }
    }

    pub fn is_configured(&self) -> bool {
        self.monitor.is_some()
    }

    /// Emit the in-progress checkpoint. Returns `None` when no monitor is
    /// configured or the monitor failed.
    pub fn start(&self, slug: &str) -> Option<CheckpointId> {
        let monitor = self.monitor.as_ref()?;

        match catch_unwind(AssertUnwindSafe(|| monitor.start_checkpoint(slug))) {
            Ok(Ok(id)) => Some(id),
            Ok(Err(e)) => {
                tracing::debug!(slug, error = %e, "Monitor rejected start checkpoint");
                None
            }
            Err(_) => {
                tracing::debug!(slug, "Monitor panicked on start checkpoint");
                None
            }
        }
    }

    /// Emit the closing checkpoint. A missing start id gets a fresh one so the
    /// outcome is still reported.
    pub fn complete(&self, id: Option<CheckpointId>, slug: &str, status: CheckpointStatus) {
        let Some(monitor) = self.monitor.as_ref() else {
            return;
        };
        let id = id.unwrap_or_default();

        match catch_unwind(AssertUnwindSafe(|| monitor.complete_checkpoint(id, slug, status))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(slug, %status, error = %e, "Monitor rejected completion checkpoint");
            }
            Err(_) => {
                tracing::debug!(slug, %status, "Monitor panicked on completion checkpoint");
            }
        }
    }
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("configured", &self.is_configured())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Built-in Monitors
// ═══════════════════════════════════════════════════════════════════════════════

/// Emits checkpoints as tracing events and metrics counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl CheckpointMonitor for TracingMonitor {
    fn start_checkpoint(&self, slug: &str) -> Result<CheckpointId> {
        let id = CheckpointId::new();
        tracing::info!(checkpoint = %id, monitor_slug = slug, status = "in_progress", "Checkpoint");
        counter!(CHECKPOINTS_TOTAL, "status" => "in_progress").increment(1);
        Ok(id)
    }

    fn complete_checkpoint(
        &self,
        id: CheckpointId,
        slug: &str,
        status: CheckpointStatus,
    ) -> Result<()> {
        tracing::info!(checkpoint = %id, monitor_slug = slug, status = status.as_str(), "Checkpoint");
        counter!(CHECKPOINTS_TOTAL, "status" => status.as_str()).increment(1);
        Ok(())
    }
}

/// A recorded checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub slug: String,
    pub status: CheckpointStatus,
    pub at: DateTime<Utc>,
}

/// Keeps every checkpoint in memory.
#[derive(Debug, Default)]
pub struct InMemoryMonitor {
    checkpoints: Mutex<Vec<Checkpoint>>,
}

impl InMemoryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.lock().clone()
    }

    /// Statuses recorded for `slug`, in order.
    pub fn statuses(&self, slug: &str) -> Vec<CheckpointStatus> {
        self.checkpoints
            .lock()
            .iter()
            .filter(|c| c.slug == slug)
            .map(|c| c.status)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.lock().is_empty()
    }

    fn push(&self, id: CheckpointId, slug: &str, status: CheckpointStatus) {
        self.checkpoints.lock().push(Checkpoint {
            id,
            slug: slug.to_string(),
            status,
            at: Utc::now(),
        });
    }
}

impl CheckpointMonitor for InMemoryMonitor {
    fn start_checkpoint(&self, slug: &str) -> Result<CheckpointId> {
        let id = CheckpointId::new();
        self.push(id, slug, CheckpointStatus::InProgress);
        Ok(id)
    }

    fn complete_checkpoint(
        &self,
        id: CheckpointId,
        slug: &str,
        status: CheckpointStatus,
    ) -> Result<()> {
        self.push(id, slug, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;

    struct Unreachable;

    impl CheckpointMonitor for Unreachable {
        fn start_checkpoint(&self, _slug: &str) -> Result<CheckpointId> {
            Err(QueueError::internal("monitor offline"))
        }

        fn complete_checkpoint(
            &self,
            _id: CheckpointId,
            _slug: &str,
            _status: CheckpointStatus,
        ) -> Result<()> {
            panic!("monitor exploded");
        }
    }

    #[test]
    fn test_unconfigured_handle_is_noop() {
        let handle = MonitorHandle::default();
        assert!(!handle.is_configured());
        assert!(handle.start("job").is_none());
        handle.complete(None, "job", CheckpointStatus::Ok);
    }

    #[test]
    fn test_failures_are_swallowed() {
        let handle = MonitorHandle::new(Some(Arc::new(Unreachable)));
        assert!(handle.start("job").is_none());
        handle.complete(None, "job", CheckpointStatus::Error);
    }

    #[test]
    fn test_in_memory_monitor_pairs_ids() {
        let monitor = Arc::new(InMemoryMonitor::new());
        let handle = MonitorHandle::new(Some(monitor.clone()));

        let id = handle.start("reportmailer-at-send");
        handle.complete(id, "reportmailer-at-send", CheckpointStatus::Ok);

        let checkpoints = monitor.checkpoints();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].id, checkpoints[1].id);
        assert_eq!(
            monitor.statuses("reportmailer-at-send"),
            vec![CheckpointStatus::InProgress, CheckpointStatus::Ok]
        );
    }
}
