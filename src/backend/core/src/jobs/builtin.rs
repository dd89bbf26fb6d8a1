//! Built-in job handlers.

use async_trait::async_trait;
use serde_json::Value;

use super::job::{Job, JobError};
use super::resolver::{HandlerRegistry, HandlerResult, JobHandler};
use crate::telemetry::PayloadRedactor;

/// Handler: log the job data and delete the job.
///
/// Registered as `"log"`. Any method name is accepted and logged. Sensitive
/// keys are masked with the global [`PayloadRedactor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPayloadHandler;

#[async_trait]
impl JobHandler for LogPayloadHandler {
    async fn handle(&self, method: &str, job: &mut Job, data: Value) -> HandlerResult {
        tracing::info!(
            queue = %job.queue(),
            job_id = %job.job_id(),
            attempt = job.attempts(),
            method,
            data = %PayloadRedactor::global().redact(&data),
            "Job payload"
        );
        Ok(())
    }

    fn auto_delete(&self) -> bool {
        true
    }
}

/// Handler: do nothing and delete the job. Registered as `"noop"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl JobHandler for NoopHandler {
    async fn handle(&self, _method: &str, _job: &mut Job, _data: Value) -> HandlerResult {
        Ok(())
    }

    fn auto_delete(&self) -> bool {
        true
    }
}

/// Handler: always fail with a retryable error. Registered as `"fail"`.
///
/// The error message is taken from `data.reason` when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingHandler;

#[async_trait]
impl JobHandler for FailingHandler {
    async fn handle(&self, _method: &str, job: &mut Job, data: Value) -> HandlerResult {
        let reason = data
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("job failed on purpose");

        Err(JobError::retryable(reason)
            .with_code("FAILING_HANDLER")
            .with_context(serde_json::json!({ "attempt": job.attempts() })))
    }
}

/// Register all built-in handlers under their short names.
pub fn register_builtin(registry: &HandlerRegistry) {
    registry
        .register::<LogPayloadHandler>("log")
        .register::<NoopHandler>("noop")
        .register::<FailingHandler>("fail");
}
