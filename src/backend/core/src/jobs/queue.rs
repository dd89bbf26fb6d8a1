//! Queue connections and reference backends.
//!
//! A [`QueueConnection`] stores raw payloads and hands out [`JobBackend`]
//! handles for reserved messages. Two connections ship with the crate:
//!
//! - [`InMemoryQueue`]: reservation with timeout-based redelivery, suitable
//!   for tests, development, and the CLI
//! - [`SyncQueue`]: fires every pushed job immediately on the caller's task
//!
//! Jobs that cannot be processed end up in a bounded [`DeadLetterQueue`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::delay::{resolve_delay_seconds, Clock, RetryDirective, SystemClock};
use super::job::{FireOutcome, Job, JobBackend, JobRuntime};
use super::payload::{self, JobPayload};
use crate::error::{ErrorCode, ErrorDetails, QueueError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Connection Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A queue store that jobs are pushed to and popped from.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// Store an already encoded payload, available after `delay_secs`.
    /// Returns the message id.
    async fn push_raw(&self, queue: &str, payload: String, delay_secs: i64) -> Result<String>;

    /// Reserve the next available message on `queue`.
    async fn pop(&self, queue: &str) -> Result<Option<Box<dyn JobBackend>>>;

    /// Number of messages on `queue`, reserved ones included.
    async fn size(&self, queue: &str) -> Result<usize>;

    /// Return expired reservations on `queue` to the ready list.
    async fn reclaim_expired(&self, _queue: &str) -> Result<usize> {
        Ok(0)
    }

    /// Current time as seen by this connection.
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Push a job for immediate processing.
    async fn push(&self, queue: &str, handler_ref: &str, data: Value) -> Result<String> {
        let body = payload::encode(&JobPayload::new(handler_ref, data))?;
        self.push_raw(queue, body, 0).await
    }

    /// Push a job that becomes available after `delay`.
    async fn later(
        &self,
        delay: RetryDirective,
        queue: &str,
        handler_ref: &str,
        data: Value,
    ) -> Result<String> {
        let delay_secs = resolve_delay_seconds(delay, self.now());
        let body = payload::encode(&JobPayload::new(handler_ref, data))?;
        self.push_raw(queue, body, delay_secs).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Queue
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    attempts: u32,
    available_at: DateTime<Utc>,
    seq: u64,
}

#[derive(Debug, Clone)]
struct Reservation {
    message: StoredMessage,
    reserved_until: DateTime<Utc>,
    token: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: Vec<StoredMessage>,
    reserved: HashMap<String, Reservation>,
}

#[derive(Debug, Default)]
struct Store {
    queues: HashMap<String, QueueState>,
    next_seq: u64,
}

impl Store {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// `now` shifted by `delay_secs`, saturating at the representable range.
/// A negative delay that underflows means "available now".
fn offset_by(now: DateTime<Utc>, delay_secs: i64) -> DateTime<Utc> {
    chrono::Duration::try_seconds(delay_secs)
        .and_then(|offset| now.checked_add_signed(offset))
        .unwrap_or(if delay_secs < 0 {
            now
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// In-process queue with reservations.
///
/// `pop` increments the message's attempt counter and reserves it for
/// `retry_after`. A reserved message that is neither deleted nor released
/// goes back to the ready list on the next [`reclaim_expired`] after its
/// reservation runs out.
///
/// [`reclaim_expired`]: QueueConnection::reclaim_expired
#[derive(Clone)]
pub struct InMemoryQueue {
    store: Arc<Mutex<Store>>,
    clock: Arc<dyn Clock>,
    retry_after: Duration,
}

impl InMemoryQueue {
    /// Default reservation timeout.
    pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(90);

    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            clock: Arc::new(SystemClock),
            retry_after: Self::DEFAULT_RETRY_AFTER,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Number of messages currently reserved on `queue`.
    pub fn reserved_count(&self, queue: &str) -> usize {
        self.store
            .lock()
            .queues
            .get(queue)
            .map_or(0, |state| state.reserved.len())
    }

    /// Queue names that have seen at least one push.
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    fn reservation_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.retry_after)
            .ok()
            .and_then(|timeout| now.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("queues", &self.queues())
            .field("retry_after", &self.retry_after)
            .finish()
    }
}

#[async_trait]
impl QueueConnection for InMemoryQueue {
    async fn push_raw(&self, queue: &str, payload: String, delay_secs: i64) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let available_at = offset_by(self.clock.now(), delay_secs.max(0));

        let mut store = self.store.lock();
        let seq = store.seq();
        store
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push(StoredMessage {
                id: id.clone(),
                body: payload,
                attempts: 0,
                available_at,
                seq,
            });

        tracing::debug!(queue, job_id = %id, delay_secs, "Job pushed");
        Ok(id)
    }

    async fn pop(&self, queue: &str) -> Result<Option<Box<dyn JobBackend>>> {
        let now = self.clock.now();
        let mut store = self.store.lock();
        let token = store.seq();
        let Some(state) = store.queues.get_mut(queue) else {
            return Ok(None);
        };

        let next = state
            .ready
            .iter()
            .enumerate()
            .filter(|(_, message)| message.available_at <= now)
            .min_by_key(|(_, message)| (message.available_at, message.seq))
            .map(|(index, _)| index);
        let Some(index) = next else {
            return Ok(None);
        };

        let mut message = state.ready.swap_remove(index);
        message.attempts += 1;

        let handle = InMemoryJob {
            id: message.id.clone(),
            body: message.body.clone(),
            attempts: message.attempts,
            queue: queue.to_string(),
            token,
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
        };
        state.reserved.insert(
            message.id.clone(),
            Reservation {
                message,
                reserved_until: self.reservation_deadline(now),
                token,
            },
        );

        tracing::debug!(queue, job_id = %handle.id, attempts = handle.attempts, "Job reserved");
        Ok(Some(Box::new(handle)))
    }

    async fn size(&self, queue: &str) -> Result<usize> {
        Ok(self
            .store
            .lock()
            .queues
            .get(queue)
            .map_or(0, |state| state.ready.len() + state.reserved.len()))
    }

    async fn reclaim_expired(&self, queue: &str) -> Result<usize> {
        let now = self.clock.now();
        let mut store = self.store.lock();
        let Some(state) = store.queues.get_mut(queue) else {
            return Ok(0);
        };

        let expired: Vec<String> = state
            .reserved
            .iter()
            .filter(|(_, reservation)| reservation.reserved_until <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(reservation) = state.reserved.remove(id) {
                let mut message = reservation.message;
                message.available_at = now;
                state.ready.push(message);
            }
        }

        if !expired.is_empty() {
            tracing::warn!(queue, count = expired.len(), "Reclaimed expired reservations");
        }
        Ok(expired.len())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Backend handle for a message reserved from an [`InMemoryQueue`].
///
/// The handle only acts while its own reservation is live. Once the
/// reservation has been reclaimed (and possibly handed to another worker)
/// `release` and `delete` fail instead of touching the message.
pub struct InMemoryJob {
    id: String,
    body: String,
    attempts: u32,
    queue: String,
    token: u64,
    store: Arc<Mutex<Store>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryJob {
    fn queue_missing(&self) -> QueueError {
        QueueError::new(ErrorCode::QueueNotFound, "Queue no longer exists")
            .with_details(ErrorDetails::new().with_queue(self.queue.clone()))
    }

    fn holds_reservation(&self, state: &QueueState) -> bool {
        state
            .reserved
            .get(&self.id)
            .is_some_and(|reservation| reservation.token == self.token)
    }

    fn lost_reservation(&self) -> String {
        format!("reservation for message {} is no longer held", self.id)
    }
}

#[async_trait]
impl JobBackend for InMemoryJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn raw_body(&self) -> &str {
        &self.body
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    async fn release(&mut self, delay_secs: i64) -> Result<()> {
        let available_at = offset_by(self.clock.now(), delay_secs);
        let mut store = self.store.lock();
        let seq = store.seq();
        let state = store
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| self.queue_missing())?;

        if !self.holds_reservation(state) {
            return Err(QueueError::release_failed(
                self.queue.clone(),
                self.lost_reservation(),
            ));
        }
        if let Some(reservation) = state.reserved.remove(&self.id) {
            let mut message = reservation.message;
            message.available_at = available_at;
            message.seq = seq;
            state.ready.push(message);
        }
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        let mut store = self.store.lock();
        let state = store
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| self.queue_missing())?;

        if !self.holds_reservation(state) {
            return Err(QueueError::delete_failed(
                self.queue.clone(),
                self.lost_reservation(),
            ));
        }
        state.reserved.remove(&self.id);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sync Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Fires every pushed job immediately.
///
/// Nothing is stored: `pop` never yields a job and `size` is always zero.
/// A handler failure is returned from `push`.
#[derive(Clone)]
pub struct SyncQueue {
    runtime: Arc<JobRuntime>,
    releases: Arc<Mutex<Vec<(String, i64)>>>,
}

impl SyncQueue {
    pub fn new(runtime: Arc<JobRuntime>) -> Self {
        Self {
            runtime,
            releases: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Release requests seen so far, as `(job_id, delay_secs)`.
    pub fn releases(&self) -> Vec<(String, i64)> {
        self.releases.lock().clone()
    }
}

#[async_trait]
impl QueueConnection for SyncQueue {
    async fn push_raw(&self, queue: &str, payload: String, _delay_secs: i64) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let backend = SyncJob {
            id: id.clone(),
            body: payload,
            releases: Arc::clone(&self.releases),
        };
        let mut job = Job::new(queue, Box::new(backend), Arc::clone(&self.runtime));

        match job.fire().await {
            FireOutcome::Completed => {
                if job.auto_delete() && !job.is_released() {
                    job.delete().await?;
                }
                Ok(id)
            }
            FireOutcome::Failed { error } | FireOutcome::Rejected { error } => Err(error),
            FireOutcome::Skipped | FireOutcome::AlreadyFired => Ok(id),
        }
    }

    async fn pop(&self, _queue: &str) -> Result<Option<Box<dyn JobBackend>>> {
        Ok(None)
    }

    async fn size(&self, _queue: &str) -> Result<usize> {
        Ok(0)
    }

    fn now(&self) -> DateTime<Utc> {
        self.runtime.clock().now()
    }
}

struct SyncJob {
    id: String,
    body: String,
    releases: Arc<Mutex<Vec<(String, i64)>>>,
}

#[async_trait]
impl JobBackend for SyncJob {
    fn job_id(&self) -> &str {
        &self.id
    }

    fn raw_body(&self) -> &str {
        &self.body
    }

    fn attempts(&self) -> u32 {
        1
    }

    async fn release(&mut self, delay_secs: i64) -> Result<()> {
        self.releases.lock().push((self.id.clone(), delay_secs));
        Ok(())
    }

    async fn delete(&mut self) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dead Letter Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// A job that was given up on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedJob {
    pub job_id: String,
    pub queue: String,
    pub name: String,
    pub raw_body: String,
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailedJob {
    pub fn from_job(job: &Job, error: impl std::fmt::Display) -> Self {
        Self {
            job_id: job.job_id().to_string(),
            queue: job.queue().to_string(),
            name: job.name(),
            raw_body: job.raw_body().to_string(),
            attempts: job.attempts(),
            error: error.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Bounded FIFO of failed jobs. The oldest entry is dropped when full.
#[derive(Debug)]
pub struct DeadLetterQueue {
    jobs: Mutex<VecDeque<FailedJob>>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            max_size: max_size.max(1),
        }
    }

    pub fn push(&self, job: FailedJob) {
        let mut jobs = self.jobs.lock();
        if jobs.len() >= self.max_size {
            if let Some(dropped) = jobs.pop_front() {
                tracing::warn!(job_id = %dropped.job_id, "Dead letter queue full, dropping oldest entry");
            }
        }
        jobs.push_back(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Copy of the current entries, oldest first.
    pub fn entries(&self) -> Vec<FailedJob> {
        self.jobs.lock().iter().cloned().collect()
    }

    pub fn drain(&self) -> Vec<FailedJob> {
        self.jobs.lock().drain(..).collect()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}
