//! End-to-end tests for the job lifecycle.
//!
//! Tests cover:
//! - Resolving and invoking `Class@method` handlers
//! - Resolution failures and handler panics staying inside `fire()`
//! - Relative and absolute release delays
//! - Monitoring checkpoints, including monitors that fail
//! - Name fallback and missing handler references

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use futures::FutureExt;
use parking_lot::Mutex;
use queueline_core::error::{ErrorCode, QueueError, Result};
use queueline_core::jobs::{
    CheckpointId, CheckpointMonitor, CheckpointStatus, Clock, FireOutcome, FnHandler,
    HandlerRegistry, HandlerResolver, HandlerResult, InMemoryMonitor, InMemoryQueue, Job, JobError, JobHandler,
    JobOptions, JobRuntime, JobStatus, ManualClock, MissingHandlerPolicy, QueueConnection,
    RetryDirective,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

#[derive(Clone, Default)]
struct ReportMailer {
    sent: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl JobHandler for ReportMailer {
    async fn handle(&self, method: &str, job: &mut Job, data: Value) -> HandlerResult {
        match method {
            "send" => {
                self.sent.lock().push(data);
                job.delete().await?;
                Ok(())
            }
            "later" => {
                job.release(RetryDirective::Seconds(30)).await?;
                Ok(())
            }
            other => Err(JobError::unknown_method(other)),
        }
    }
}

#[derive(Clone, Default)]
struct Renderer;

#[async_trait]
impl JobHandler for Renderer {
    async fn handle(&self, _method: &str, _job: &mut Job, _data: Value) -> HandlerResult {
        panic!("renderer crashed");
    }
}

/// Counts every resolution before handing off to a registry.
#[derive(Default)]
struct CountingResolver {
    calls: AtomicUsize,
    registry: HandlerRegistry,
}

impl HandlerResolver for CountingResolver {
    fn resolve(&self, class: &str) -> Result<Box<dyn JobHandler>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.registry.resolve(class)
    }
}

struct Fixture {
    queue: InMemoryQueue,
    clock: Arc<ManualClock>,
    monitor: Arc<InMemoryMonitor>,
    runtime: Arc<JobRuntime>,
}

impl Fixture {
    fn new(registry: HandlerRegistry) -> Self {
        let clock = Arc::new(ManualClock::default());
        let monitor = Arc::new(InMemoryMonitor::new());
        let queue = InMemoryQueue::new()
            .with_clock(clock.clone())
            .with_retry_after(Duration::from_secs(60));
        let runtime = Arc::new(
            JobRuntime::new(Arc::new(registry))
                .with_clock(clock.clone())
                .with_monitor(monitor.clone()),
        );
        Self {
            queue,
            clock,
            monitor,
            runtime,
        }
    }

    async fn push_raw(&self, body: &str) {
        self.queue
            .push_raw("default", body.to_string(), 0)
            .await
            .unwrap();
    }

    async fn pop(&self) -> Job {
        let backend = self.queue.pop("default").await.unwrap().unwrap();
        Job::new("default", backend, Arc::clone(&self.runtime))
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_handler_deletes_job() {
    let mailer = ReportMailer::default();
    let registry = HandlerRegistry::new();
    registry.register_instance("ReportMailer", mailer.clone());
    let fixture = Fixture::new(registry);

    fixture
        .push_raw(r#"{"job":"ReportMailer@send","data":{"id":42}}"#)
        .await;
    let mut job = fixture.pop().await;

    assert!(job.fire().await.is_completed());
    assert!(job.is_deleted());
    assert_eq!(job.status(), JobStatus::Deleted);
    assert_eq!(mailer.sent.lock().clone(), vec![json!({"id": 42})]);
    assert_eq!(fixture.queue.size("default").await.unwrap(), 0);
    assert_eq!(
        fixture.monitor.statuses("reportmailer-at-send"),
        vec![CheckpointStatus::InProgress, CheckpointStatus::Ok]
    );
}

#[tokio::test]
async fn test_resolution_failure_is_contained() {
    let fixture = Fixture::new(HandlerRegistry::new());
    fixture.push_raw(r#"{"job":"FlakyJob"}"#).await;
    let mut job = fixture.pop().await;

    let outcome = job.fire().await;

    assert_eq!(
        outcome.error().map(QueueError::code),
        Some(ErrorCode::ResolutionFailed)
    );
    assert!(!job.is_deleted());
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(
        fixture.monitor.statuses("flakyjob"),
        vec![CheckpointStatus::InProgress, CheckpointStatus::Error]
    );
}

#[tokio::test]
async fn test_relative_release_reaches_backend() {
    let registry = HandlerRegistry::new();
    registry.register::<ReportMailer>("ReportMailer");
    let fixture = Fixture::new(registry);

    fixture.push_raw(r#"{"job":"ReportMailer@later"}"#).await;
    let mut job = fixture.pop().await;

    assert!(job.fire().await.is_completed());
    assert_eq!(job.released_delay(), Some(30));
    assert_eq!(job.status(), JobStatus::Released);

    fixture.clock.advance(Duration::from_secs(29));
    assert!(fixture.queue.pop("default").await.unwrap().is_none());
    fixture.clock.advance(Duration::from_secs(1));
    let again = fixture.queue.pop("default").await.unwrap().unwrap();
    assert_eq!(again.attempts(), 2);
}

#[tokio::test]
async fn test_absolute_release_in_past_is_immediate() {
    let clock = Arc::new(ManualClock::default());
    let past = clock.now() - ChronoDuration::seconds(10);

    let handler = FnHandler::new(move |job, _data| {
        async move { job.release(past).await.map(|_| ()).map_err(JobError::from) }.boxed()
    });
    let registry = HandlerRegistry::new();
    registry.register_instance("Retry", handler);

    let queue = InMemoryQueue::new().with_clock(clock.clone());
    let runtime = Arc::new(JobRuntime::new(Arc::new(registry)).with_clock(clock.clone()));
    queue.push("default", "Retry", Value::Null).await.unwrap();

    let backend = queue.pop("default").await.unwrap().unwrap();
    let mut job = Job::new("default", backend, runtime);

    assert!(job.fire().await.is_completed());
    assert_eq!(job.released_delay(), Some(0));
    assert!(queue.pop("default").await.unwrap().is_some());
}

// ============================================================================
// Failure Containment
// ============================================================================

#[tokio::test]
async fn test_panicking_handler_reports_error_checkpoint() {
    let registry = HandlerRegistry::new();
    registry.register::<Renderer>("Render");
    let fixture = Fixture::new(registry);

    fixture.push_raw(r#"{"job":"Render"}"#).await;
    let mut job = fixture.pop().await;

    let outcome = job.fire().await;
    assert!(outcome.is_failed());
    assert!(outcome.error().unwrap().to_string().contains("renderer crashed"));
    assert_eq!(
        fixture.monitor.statuses("render"),
        vec![CheckpointStatus::InProgress, CheckpointStatus::Error]
    );
}

struct BrokenMonitor;

impl CheckpointMonitor for BrokenMonitor {
    fn start_checkpoint(&self, _slug: &str) -> Result<CheckpointId> {
        panic!("monitor client not initialised");
    }

    fn complete_checkpoint(
        &self,
        _id: CheckpointId,
        _slug: &str,
        _status: CheckpointStatus,
    ) -> Result<()> {
        Err(QueueError::internal("monitor unreachable"))
    }
}

#[tokio::test]
async fn test_failing_monitor_does_not_change_outcome() {
    let mailer = ReportMailer::default();
    let registry = HandlerRegistry::new();
    registry.register_instance("ReportMailer", mailer.clone());
    let queue = InMemoryQueue::new();
    let runtime =
        Arc::new(JobRuntime::new(Arc::new(registry)).with_monitor(Arc::new(BrokenMonitor)));

    queue
        .push("default", "ReportMailer@send", json!({"id": 1}))
        .await
        .unwrap();
    let backend = queue.pop("default").await.unwrap().unwrap();
    let mut job = Job::new("default", backend, runtime);

    assert!(job.fire().await.is_completed());
    assert!(job.is_deleted());
    assert_eq!(mailer.sent.lock().len(), 1);
}

#[tokio::test]
async fn test_fire_twice_does_not_reinvoke() {
    let mailer = ReportMailer::default();
    let registry = HandlerRegistry::new();
    registry.register_instance("ReportMailer", mailer.clone());
    let fixture = Fixture::new(registry);

    fixture.push_raw(r#"{"job":"ReportMailer@send","data":1}"#).await;
    let mut job = fixture.pop().await;

    job.fire().await;
    assert!(matches!(job.fire().await, FireOutcome::AlreadyFired));
    assert_eq!(mailer.sent.lock().len(), 1);
}

// ============================================================================
// Payload Edge Cases
// ============================================================================

#[tokio::test]
async fn test_missing_handler_reference_is_skipped() {
    let fixture = Fixture::new(HandlerRegistry::new());
    fixture.push_raw(r#"{"data":{"id":1}}"#).await;
    let mut job = fixture.pop().await;

    assert!(matches!(job.fire().await, FireOutcome::Skipped));
    assert_eq!(job.name(), "(undefined)");
    assert!(!job.is_deleted());
    assert!(fixture.monitor.is_empty());
}

#[tokio::test]
async fn test_missing_handler_reference_never_reaches_resolver() {
    let resolver = Arc::new(CountingResolver::default());
    resolver.registry.register::<ReportMailer>("ReportMailer");
    let runtime = Arc::new(JobRuntime::new(resolver.clone()));
    let queue = InMemoryQueue::new();

    for raw in [r#"{"data":{"id":1}}"#, r#"{"job":"","data":null}"#] {
        queue
            .push_raw("default", raw.to_string(), 0)
            .await
            .unwrap();
        let backend = queue.pop("default").await.unwrap().unwrap();
        let mut job = Job::new("default", backend, runtime.clone());

        assert!(matches!(job.fire().await, FireOutcome::Skipped));
    }
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);

    queue
        .push("default", "ReportMailer@send", json!({"to": "ops"}))
        .await
        .unwrap();
    let backend = queue.pop("default").await.unwrap().unwrap();
    let mut job = Job::new("default", backend, runtime);
    assert!(matches!(job.fire().await, FireOutcome::Completed));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_handler_reference_rejected_by_policy() {
    let queue = InMemoryQueue::new();
    let runtime = Arc::new(
        JobRuntime::new(Arc::new(HandlerRegistry::new())).with_options(JobOptions {
            missing_handler: MissingHandlerPolicy::Reject,
        }),
    );
    queue
        .push_raw("default", r#"{"data":1}"#.to_string(), 0)
        .await
        .unwrap();

    let backend = queue.pop("default").await.unwrap().unwrap();
    let mut job = Job::new("default", backend, runtime);

    assert!(matches!(job.fire().await, FireOutcome::Rejected { .. }));
}

#[tokio::test]
async fn test_accessors_report_backend_state() {
    let fixture = Fixture::new(HandlerRegistry::new());
    fixture
        .push_raw(r#"{"job":"Billing@charge","data":{"amount":5}}"#)
        .await;
    let job = fixture.pop().await;

    assert_eq!(job.name(), "Billing@charge");
    assert_eq!(job.queue(), "default");
    assert_eq!(job.attempts(), 1);
    assert!(job.raw_body().contains("\"amount\":5"));
    assert!(!job.auto_delete());
    assert!(!job.is_deleted());
    assert_eq!(job.status(), JobStatus::Pending);
}

#[tokio::test]
async fn test_delete_outside_fire_is_idempotent() {
    let fixture = Fixture::new(HandlerRegistry::new());
    fixture.push_raw(r#"{"job":"A"}"#).await;
    let mut job = fixture.pop().await;

    job.delete().await.unwrap();
    job.delete().await.unwrap();

    assert!(job.is_deleted());
    assert_eq!(fixture.queue.size("default").await.unwrap(), 0);
}
