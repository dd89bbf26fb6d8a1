//! Queue worker.
//!
//! Pops jobs from a [`QueueConnection`], fires them, and applies the
//! finalization policy: auto-delete on success, release with backoff on
//! failure, dead-letter once the attempt budget is spent.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::delay::BackoffStrategy;
use super::job::{FireOutcome, Job, JobBackend, JobRuntime, JobStatus};
use super::queue::{DeadLetterQueue, FailedJob, QueueConnection};
use crate::error::{QueueError, Result};

/// Configuration for the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker name/identifier
    pub name: String,
    /// Queues to poll, highest priority first
    pub queues: Vec<String>,
    /// Attempts before a job is dead-lettered (0 = unlimited)
    pub max_tries: u32,
    /// Delay applied when releasing a failed job
    pub backoff: BackoffStrategy,
    /// Pause between polls when every queue is empty
    #[serde(with = "humantime_serde")]
    pub sleep: Duration,
    /// Return expired reservations to the queue before polling
    pub reclaim: bool,
    /// Maximum items kept in the dead letter queue
    pub dead_letter_max_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "queueline-worker".to_string(),
            queues: vec!["default".to_string()],
            max_tries: 3,
            backoff: BackoffStrategy::default(),
            sleep: Duration::from_secs(3),
            reclaim: true,
            dead_letter_max_size: 1000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stats
// ═══════════════════════════════════════════════════════════════════════════════

/// Statistics for the worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Total jobs processed
    pub processed: Arc<AtomicU64>,
    /// Jobs whose handler returned normally
    pub succeeded: Arc<AtomicU64>,
    /// Jobs whose handler failed or whose payload was rejected
    pub failed: Arc<AtomicU64>,
    /// Jobs put back on the queue
    pub released: Arc<AtomicU64>,
    /// Jobs moved to the dead letter queue
    pub dead_lettered: Arc<AtomicU64>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for reporting.
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            processed: self.processed(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            released: self.released(),
            dead_lettered: self.dead_lettered(),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatsSnapshot {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub released: u64,
    pub dead_lettered: u64,
}

/// Summary of one processed job.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedJob {
    pub job_id: String,
    pub queue: String,
    pub name: String,
    pub attempts: u32,
    pub outcome: &'static str,
    pub status: JobStatus,
    pub released_delay: Option<i64>,
    pub dead_lettered: bool,
    pub error: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Worker
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown: tokio::sync::watch::Sender<bool>,
    stats: WorkerStats,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down after the current job.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Get worker statistics.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        self.shutdown();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }
    }
}

/// Processes jobs from a queue connection.
pub struct Worker {
    config: WorkerConfig,
    runtime: Arc<JobRuntime>,
    dead_letter: Arc<DeadLetterQueue>,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(config: WorkerConfig, runtime: Arc<JobRuntime>) -> Self {
        let dead_letter = Arc::new(DeadLetterQueue::new(config.dead_letter_max_size));
        Self {
            config,
            runtime,
            dead_letter,
            stats: WorkerStats::new(),
        }
    }

    /// Share a dead letter queue with other workers.
    pub fn with_dead_letter(mut self, dead_letter: Arc<DeadLetterQueue>) -> Self {
        self.dead_letter = dead_letter;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    pub fn dead_letter(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letter
    }

    /// Pop and process one job from the first non-empty queue.
    ///
    /// Returns `None` when every queue is empty.
    pub async fn run_next_job(
        &self,
        connection: &dyn QueueConnection,
    ) -> Result<Option<ProcessedJob>> {
        for queue in &self.config.queues {
            if let Some(backend) = self.reserve(connection, queue).await? {
                let job = Job::new(queue.clone(), backend, Arc::clone(&self.runtime));
                return Ok(Some(self.process(job).await));
            }
        }
        Ok(None)
    }

    /// Process jobs until no queue has anything left to run.
    ///
    /// A single call fires each message at most `max_tries + 1` times (once
    /// when `max_tries` is 0), so the last round can reach the max tries
    /// check. A message that comes back again after that is released with
    /// no delay and its queue is left alone for the rest of the call.
    pub async fn drain(&self, connection: &dyn QueueConnection) -> Result<Vec<ProcessedJob>> {
        let limit = match self.config.max_tries {
            0 => 1,
            max_tries => max_tries.saturating_add(1),
        };
        let mut runs: HashMap<String, u32> = HashMap::new();
        let mut parked: HashSet<&str> = HashSet::new();
        let mut processed = Vec::new();

        'poll: loop {
            for queue in &self.config.queues {
                if parked.contains(queue.as_str()) {
                    continue;
                }
                let Some(mut backend) = self.reserve(connection, queue).await? else {
                    continue;
                };

                let count = runs.entry(backend.job_id().to_string()).or_default();
                if *count >= limit {
                    tracing::warn!(
                        queue = %queue,
                        job_id = %backend.job_id(),
                        runs = *count,
                        "Job keeps coming back, leaving it on the queue"
                    );
                    backend.release(0).await?;
                    parked.insert(queue);
                    continue 'poll;
                }
                *count += 1;

                let job = Job::new(queue.clone(), backend, Arc::clone(&self.runtime));
                processed.push(self.process(job).await);
                continue 'poll;
            }
            break;
        }
        Ok(processed)
    }

    async fn reserve(
        &self,
        connection: &dyn QueueConnection,
        queue: &str,
    ) -> Result<Option<Box<dyn JobBackend>>> {
        if self.config.reclaim {
            connection.reclaim_expired(queue).await?;
        }
        connection.pop(queue).await
    }

    /// Fire a popped job and finalize it.
    pub async fn process(&self, mut job: Job) -> ProcessedJob {
        WorkerStats::bump(&self.stats.processed);

        if self.exceeded_max_tries(&job) {
            let error = format!(
                "Job has been attempted too many times ({} > {})",
                job.attempts(),
                self.config.max_tries
            );
            self.bury(&mut job, &error).await;
            WorkerStats::bump(&self.stats.failed);
            return self.summary(&job, "max_tries_exceeded", true, Some(error));
        }

        let outcome = job.fire().await;
        let mut dead_lettered = false;

        match &outcome {
            FireOutcome::Completed => {
                WorkerStats::bump(&self.stats.succeeded);
                if job.auto_delete() && !job.is_deleted() && !job.is_released() {
                    self.finalize_delete(&mut job).await;
                }
            }
            FireOutcome::Failed { error } => {
                WorkerStats::bump(&self.stats.failed);
                if !job.is_deleted() && !job.is_released() {
                    if !error.is_retryable() || self.will_exceed_max_tries(&job) {
                        self.bury(&mut job, error).await;
                        dead_lettered = true;
                    } else {
                        self.release_with_backoff(&mut job).await;
                    }
                }
            }
            FireOutcome::Rejected { error } => {
                WorkerStats::bump(&self.stats.failed);
                self.bury(&mut job, error).await;
                dead_lettered = true;
            }
            FireOutcome::Skipped => {
                tracing::warn!(queue = %job.queue(), job_id = %job.job_id(), "Deleting job with no handler");
                self.finalize_delete(&mut job).await;
            }
            FireOutcome::AlreadyFired => {}
        }

        if job.is_released() {
            WorkerStats::bump(&self.stats.released);
        }

        let error = outcome.error().map(QueueError::to_string);
        self.summary(&job, outcome.label(), dead_lettered, error)
    }

    /// Run the poll loop on a tokio task until shut down.
    pub fn start(self, connection: Arc<dyn QueueConnection>) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
        let stats = self.stats.clone();

        let task = tokio::spawn(async move {
            tracing::info!(
                worker = %self.config.name,
                queues = ?self.config.queues,
                max_tries = self.config.max_tries,
                "Worker started"
            );

            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let idle = match self.run_next_job(connection.as_ref()).await {
                    Ok(Some(_)) => false,
                    Ok(None) => true,
                    Err(e) => {
                        e.log();
                        true
                    }
                };

                if idle {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(self.config.sleep) => {}
                    }
                }
            }

            tracing::info!(
                worker = %self.config.name,
                processed = self.stats.processed(),
                "Worker stopped"
            );
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            stats,
            task,
        }
    }

    fn exceeded_max_tries(&self, job: &Job) -> bool {
        self.config.max_tries > 0 && job.attempts() > self.config.max_tries
    }

    fn will_exceed_max_tries(&self, job: &Job) -> bool {
        self.config.max_tries > 0 && job.attempts() >= self.config.max_tries
    }

    async fn release_with_backoff(&self, job: &mut Job) {
        let delay = self.config.backoff.delay_for_attempt(job.attempts());
        if let Err(e) = job.release(delay).await {
            e.log();
        }
    }

    async fn finalize_delete(&self, job: &mut Job) {
        if let Err(e) = job.delete().await {
            e.log();
        }
    }

    async fn bury(&self, job: &mut Job, error: impl std::fmt::Display) {
        self.dead_letter.push(FailedJob::from_job(job, &error));
        WorkerStats::bump(&self.stats.dead_lettered);
        tracing::error!(
            queue = %job.queue(),
            job = %job.name(),
            job_id = %job.job_id(),
            attempts = job.attempts(),
            error = %error,
            "Job moved to dead letter queue"
        );
        self.finalize_delete(job).await;
    }

    fn summary(
        &self,
        job: &Job,
        outcome: &'static str,
        dead_lettered: bool,
        error: Option<String>,
    ) -> ProcessedJob {
        ProcessedJob {
            job_id: job.job_id().to_string(),
            queue: job.queue().to_string(),
            name: job.name(),
            attempts: job.attempts(),
            outcome,
            status: job.status(),
            released_delay: job.released_delay(),
            dead_lettered,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.queues, vec!["default".to_string()]);
        assert_eq!(config.max_tries, 3);
        assert!(config.reclaim);
    }

    #[test]
    fn test_worker_config_deserialize() {
        let config: WorkerConfig = serde_json::from_value(serde_json::json!({
            "queues": ["high", "low"],
            "sleep": "250ms",
            "backoff": {"kind": "fixed", "delay_secs": 10}
        }))
        .unwrap();

        assert_eq!(config.queues, vec!["high", "low"]);
        assert_eq!(config.sleep, Duration::from_millis(250));
        assert_eq!(config.backoff, BackoffStrategy::fixed(10));
        assert_eq!(config.max_tries, 3);
    }

    #[test]
    fn test_worker_stats() {
        let stats = WorkerStats::new();
        assert_eq!(stats.processed(), 0);
        assert_eq!(stats.dead_lettered(), 0);

        WorkerStats::bump(&stats.processed);
        WorkerStats::bump(&stats.released);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.released, 1);
        assert_eq!(snapshot.failed, 0);
    }
}
