//! Integration tests for the queue worker.
//!
//! Tests cover:
//! - Auto-deletion after a successful run
//! - Release with backoff after a failure
//! - Dead-lettering when the attempt budget is spent or the payload is unusable
//! - Redelivery of abandoned reservations
//! - Queue priority order
//! - Draining with an unlimited attempt budget
//! - The background poll loop and graceful shutdown

use futures::FutureExt;
use queueline_core::jobs::{
    register_builtin, BackoffStrategy, FnHandler, HandlerRegistry, InMemoryQueue, JobError,
    JobRuntime, JobStatus, ManualClock, QueueConnection, Worker, WorkerConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn builtin_runtime(clock: Arc<ManualClock>) -> Arc<JobRuntime> {
    let registry = HandlerRegistry::new();
    register_builtin(&registry);
    Arc::new(JobRuntime::new(Arc::new(registry)).with_clock(clock))
}

fn setup(config: WorkerConfig) -> (Worker, InMemoryQueue, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let queue = InMemoryQueue::new()
        .with_clock(clock.clone())
        .with_retry_after(Duration::from_secs(60));
    let worker = Worker::new(config, builtin_runtime(clock.clone()));
    (worker, queue, clock)
}

// ============================================================================
// Finalization Policy
// ============================================================================

#[tokio::test]
async fn test_auto_delete_after_success() {
    let (worker, queue, _) = setup(WorkerConfig::default());
    queue.push("default", "noop", json!({"x": 1})).await.unwrap();

    let processed = worker.run_next_job(&queue).await.unwrap().unwrap();

    assert_eq!(processed.outcome, "completed");
    assert_eq!(processed.status, JobStatus::Deleted);
    assert_eq!(queue.size("default").await.unwrap(), 0);
    assert_eq!(worker.stats().succeeded(), 1);
}

#[tokio::test]
async fn test_auto_delete_skips_self_released_job() {
    let clock = Arc::new(ManualClock::default());
    let handler = FnHandler::new(|job, _data| {
        async move { job.release(5_i64).await.map(|_| ()).map_err(JobError::from) }.boxed()
    })
    .auto_delete();
    let registry = HandlerRegistry::new();
    registry.register_instance("Poller", handler);
    let runtime = JobRuntime::new(Arc::new(registry)).with_clock(clock.clone());
    let worker = Worker::new(WorkerConfig::default(), Arc::new(runtime));
    let queue = InMemoryQueue::new().with_clock(clock.clone());
    queue.push("default", "Poller", Value::Null).await.unwrap();

    let processed = worker.run_next_job(&queue).await.unwrap().unwrap();

    assert_eq!(processed.outcome, "completed");
    assert_eq!(processed.status, JobStatus::Released);
    assert_eq!(queue.size("default").await.unwrap(), 1);
    clock.advance(Duration::from_secs(5));
    assert!(queue.pop("default").await.unwrap().is_some());
}

#[tokio::test]
async fn test_failure_is_released_with_backoff() {
    let config = WorkerConfig {
        max_tries: 3,
        backoff: BackoffStrategy::fixed(10),
        ..WorkerConfig::default()
    };
    let (worker, queue, clock) = setup(config);
    queue.push("default", "fail", Value::Null).await.unwrap();

    let first = worker.run_next_job(&queue).await.unwrap().unwrap();
    assert_eq!(first.outcome, "failed");
    assert_eq!(first.status, JobStatus::Released);
    assert_eq!(first.released_delay, Some(10));
    assert!(!first.dead_lettered);

    assert!(worker.run_next_job(&queue).await.unwrap().is_none());
    clock.advance(Duration::from_secs(10));

    let second = worker.run_next_job(&queue).await.unwrap().unwrap();
    assert_eq!(second.attempts, 2);
    assert_eq!(worker.stats().released(), 2);
}

#[tokio::test]
async fn test_last_attempt_is_dead_lettered() {
    let config = WorkerConfig {
        max_tries: 2,
        backoff: BackoffStrategy::fixed(0),
        ..WorkerConfig::default()
    };
    let (worker, queue, _) = setup(config);
    queue
        .push("default", "fail", json!({"reason": "smtp down"}))
        .await
        .unwrap();

    let processed = worker.drain(&queue).await.unwrap();

    assert_eq!(processed.len(), 2);
    assert!(processed[1].dead_lettered);
    assert_eq!(processed[1].status, JobStatus::Deleted);
    assert_eq!(queue.size("default").await.unwrap(), 0);

    let buried = worker.dead_letter().entries();
    assert_eq!(buried.len(), 1);
    assert_eq!(buried[0].name, "fail");
    assert_eq!(buried[0].attempts, 2);
    assert!(buried[0].error.contains("smtp down"));
}

#[tokio::test]
async fn test_huge_backoff_parks_the_job() {
    let config = WorkerConfig {
        max_tries: 3,
        backoff: BackoffStrategy::fixed(u64::MAX),
        ..WorkerConfig::default()
    };
    let (worker, queue, clock) = setup(config);
    queue.push("default", "fail", Value::Null).await.unwrap();

    let processed = worker.run_next_job(&queue).await.unwrap().unwrap();
    assert_eq!(processed.status, JobStatus::Released);
    assert_eq!(processed.released_delay, Some(i64::MAX));
    assert!(!processed.dead_lettered);

    clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
    assert!(worker.run_next_job(&queue).await.unwrap().is_none());
    assert_eq!(queue.size("default").await.unwrap(), 1);
}

#[tokio::test]
async fn test_drain_stops_when_unlimited_job_keeps_failing() {
    let config = WorkerConfig {
        max_tries: 0,
        backoff: BackoffStrategy::fixed(0),
        ..WorkerConfig::default()
    };
    let (worker, queue, _) = setup(config);
    queue.push("default", "fail", Value::Null).await.unwrap();
    queue.push("default", "noop", Value::Null).await.unwrap();

    let processed = tokio::time::timeout(Duration::from_secs(5), worker.drain(&queue))
        .await
        .expect("drain returned")
        .unwrap();

    let names: Vec<&str> = processed.iter().map(|job| job.name.as_str()).collect();
    assert_eq!(names, vec!["fail", "noop"]);
    assert_eq!(processed[0].status, JobStatus::Released);
    assert!(worker.dead_letter().is_empty());
    assert_eq!(queue.size("default").await.unwrap(), 1);
    assert_eq!(queue.reserved_count("default"), 0);
}

#[tokio::test]
async fn test_malformed_payload_is_dead_lettered() {
    let (worker, queue, _) = setup(WorkerConfig::default());
    queue
        .push_raw("default", "this is not json".to_string(), 0)
        .await
        .unwrap();

    let processed = worker.run_next_job(&queue).await.unwrap().unwrap();

    assert_eq!(processed.outcome, "rejected");
    assert!(processed.dead_lettered);
    assert_eq!(processed.name, "(undefined)");
    assert_eq!(worker.dead_letter().len(), 1);
    assert_eq!(queue.size("default").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_handler_is_buried_without_retry() {
    let (worker, queue, _) = setup(WorkerConfig::default());
    queue.push("default", "Missing@run", Value::Null).await.unwrap();

    let processed = worker.run_next_job(&queue).await.unwrap().unwrap();

    assert_eq!(processed.outcome, "failed");
    assert!(processed.dead_lettered);
    assert_eq!(worker.stats().dead_lettered(), 1);
}

// ============================================================================
// Redelivery
// ============================================================================

#[tokio::test]
async fn test_abandoned_reservation_exceeding_max_tries() {
    let config = WorkerConfig {
        max_tries: 1,
        ..WorkerConfig::default()
    };
    let (worker, queue, clock) = setup(config);
    queue.push("default", "noop", Value::Null).await.unwrap();

    // A crashed worker reserved the job and never finalized it.
    let abandoned = queue.pop("default").await.unwrap().unwrap();
    assert_eq!(abandoned.attempts(), 1);
    assert!(worker.run_next_job(&queue).await.unwrap().is_none());

    clock.advance(Duration::from_secs(60));
    let processed = worker.run_next_job(&queue).await.unwrap().unwrap();

    assert_eq!(processed.attempts, 2);
    assert_eq!(processed.outcome, "max_tries_exceeded");
    assert!(processed.dead_lettered);
    assert_eq!(queue.size("default").await.unwrap(), 0);
}

#[tokio::test]
async fn test_queues_are_polled_in_priority_order() {
    let config = WorkerConfig {
        queues: vec!["high".to_string(), "low".to_string()],
        ..WorkerConfig::default()
    };
    let (worker, queue, _) = setup(config);
    queue.push("low", "noop", Value::Null).await.unwrap();
    queue.push("high", "noop", Value::Null).await.unwrap();

    let first = worker.run_next_job(&queue).await.unwrap().unwrap();
    let second = worker.run_next_job(&queue).await.unwrap().unwrap();

    assert_eq!(first.queue, "high");
    assert_eq!(second.queue, "low");
}

// ============================================================================
// Background Loop
// ============================================================================

#[tokio::test]
async fn test_worker_loop_processes_and_stops() {
    let queue = Arc::new(InMemoryQueue::new());
    for n in 0..3 {
        queue.push("default", "log", json!({ "n": n })).await.unwrap();
    }

    let registry = HandlerRegistry::new();
    register_builtin(&registry);
    let config = WorkerConfig {
        sleep: Duration::from_millis(10),
        ..WorkerConfig::default()
    };
    let worker = Worker::new(config, Arc::new(JobRuntime::new(Arc::new(registry))));
    let handle = worker.start(queue.clone());

    for _ in 0..100 {
        if handle.stats().succeeded() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(handle.stats().succeeded(), 3);
    handle.stop().await;
    assert_eq!(queue.size("default").await.unwrap(), 0);
}
