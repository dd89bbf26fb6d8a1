//! Payload inspection.

use anyhow::{Context, Result};
use clap::Args;
use queueline_core::jobs::payload::decode;
use queueline_core::jobs::monitor_slug;
use serde::Serialize;
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ParseArgs {
    /// Raw payload JSON
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    payload: Option<String>,

    /// Read the payload from a file instead
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ParsedPayload {
    name: String,
    class: String,
    method: String,
    monitor_slug: String,
    id: Option<String>,
    attempts: Option<u32>,
    data: serde_json::Value,
}

pub fn execute(args: ParseArgs, format: OutputFormat) -> Result<()> {
    let raw = match (args.payload, args.file) {
        (Some(raw), _) => raw,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read payload file: {}", path.display()))?,
        (None, None) => anyhow::bail!("Provide a payload or --file"),
    };

    let payload = decode(raw.trim())?;
    let handler = payload.handler();
    let parsed = ParsedPayload {
        monitor_slug: monitor_slug(&payload.handler_ref),
        name: payload.handler_ref,
        class: handler.class,
        method: handler.method,
        id: payload.id,
        attempts: payload.attempts,
        data: payload.data,
    };

    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Job: {}", parsed.name));
            output::print_detail("Class", &parsed.class);
            output::print_detail("Method", &parsed.method);
            output::print_detail("Monitor slug", &parsed.monitor_slug);
            output::print_detail("ID", parsed.id.as_deref().unwrap_or("-"));
            output::print_detail("Data", &parsed.data.to_string());
        }
        _ => output::print_item(&parsed, format)?,
    }

    Ok(())
}
