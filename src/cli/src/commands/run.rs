//! Local job runs.
//!
//! Pushes one raw payload per line of a file onto an in-memory queue, then
//! drains it with a worker that has the built-in handlers registered
//! (`log`, `noop`, `fail`).

use anyhow::{Context, Result};
use clap::Args;
use queueline_core::config::Config;
use queueline_core::jobs::{
    register_builtin, HandlerRegistry, InMemoryQueue, JobRuntime, ProcessedJob, QueueConnection,
    TracingMonitor, Worker,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::Tabled;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// File with one JSON payload per line (`#` starts a comment line)
    file: PathBuf,

    /// Queue to push onto and work
    #[arg(short, long)]
    queue: Option<String>,

    /// Configuration file (environment variables still apply)
    #[arg(short, long, env = "QUEUELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the worker's max tries (0 = unlimited)
    #[arg(long)]
    max_tries: Option<u32>,
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Job")]
    name: String,
    #[tabled(rename = "Attempt")]
    attempts: u32,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&ProcessedJob> for JobRow {
    fn from(job: &ProcessedJob) -> Self {
        let status = match job.released_delay {
            Some(delay) => format!("{} (+{}s)", job.status, delay),
            None => job.status.to_string(),
        };
        Self {
            id: job.job_id.chars().take(8).collect(),
            name: job.name.clone(),
            attempts: job.attempts,
            outcome: job.outcome.to_string(),
            status,
            error: job.error.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    processed: &'a [ProcessedJob],
    stats: queueline_core::jobs::WorkerStatsSnapshot,
    dead_letters: Vec<queueline_core::jobs::FailedJob>,
    remaining: usize,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config from environment")?,
    };
    Ok(config)
}

pub async fn execute(args: RunArgs, format: OutputFormat) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    let queue_name = args
        .queue
        .unwrap_or_else(|| config.queue.default_queue.clone());
    config.worker.queues = vec![queue_name.clone()];
    if let Some(max_tries) = args.max_tries {
        config.worker.max_tries = max_tries;
    }

    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read payload file: {}", args.file.display()))?;

    let queue = InMemoryQueue::new().with_retry_after(config.queue.retry_after);
    let mut pushed = 0usize;
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        queue.push_raw(&queue_name, line.to_string(), 0).await?;
        pushed += 1;
    }

    if pushed == 0 {
        output::print_info("No payloads found.");
        return Ok(());
    }

    let registry = HandlerRegistry::new();
    register_builtin(&registry);
    let mut runtime = JobRuntime::new(Arc::new(registry)).with_options(config.jobs.clone());
    if config.monitoring.checkpoints {
        runtime = runtime.with_monitor(Arc::new(TracingMonitor));
    }

    let worker = Worker::new(config.worker.clone(), Arc::new(runtime));
    let processed = worker.drain(&queue).await?;
    let remaining = queue.size(&queue_name).await?;

    let report = RunReport {
        processed: &processed,
        stats: worker.stats().snapshot(),
        dead_letters: worker.dead_letter().entries(),
        remaining,
    };

    match format {
        OutputFormat::Table => {
            let rows: Vec<JobRow> = processed.iter().map(JobRow::from).collect();
            output::print_list(&rows, format)?;

            output::print_header("Summary");
            output::print_detail("Pushed", &pushed.to_string());
            output::print_detail("Succeeded", &report.stats.succeeded.to_string());
            output::print_detail("Failed", &report.stats.failed.to_string());
            output::print_detail("Released", &report.stats.released.to_string());
            output::print_detail("Dead-lettered", &report.stats.dead_lettered.to_string());

            if remaining > 0 {
                output::print_warning(&format!(
                    "{} job(s) left on queue '{}'",
                    remaining, queue_name
                ));
            }
            for failed in &report.dead_letters {
                output::print_error(&format!("{} [{}]: {}", failed.name, failed.job_id, failed.error));
            }
        }
        _ => output::print_item(&report, format)?,
    }

    Ok(())
}
