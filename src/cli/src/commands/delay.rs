//! Retry delay resolution.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use queueline_core::jobs::{resolve_delay_seconds, Clock, RetryDirective, SystemClock};
use serde::Serialize;

use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct DelayArgs {
    /// Relative delay in seconds
    #[arg(short, long, allow_negative_numbers = true, conflicts_with = "at")]
    seconds: Option<i64>,

    /// Absolute time (RFC 3339) at which the job becomes available again
    #[arg(short, long, required_unless_present = "seconds")]
    at: Option<String>,
}

#[derive(Debug, Serialize)]
struct ResolvedDelay {
    directive: String,
    now: DateTime<Utc>,
    delay_seconds: i64,
}

pub fn execute(args: DelayArgs, format: OutputFormat) -> Result<()> {
    let directive = match (args.seconds, args.at) {
        (Some(seconds), _) => RetryDirective::Seconds(seconds),
        (None, Some(at)) => {
            let at = DateTime::parse_from_rfc3339(&at)
                .with_context(|| format!("Invalid RFC 3339 timestamp: {}", at))?;
            RetryDirective::At(at.with_timezone(&Utc))
        }
        (None, None) => anyhow::bail!("Provide --seconds or --at"),
    };

    let now = SystemClock.now();
    let resolved = ResolvedDelay {
        directive: directive.to_string(),
        now,
        delay_seconds: resolve_delay_seconds(directive, now),
    };

    match format {
        OutputFormat::Table => {
            output::print_detail("Directive", &resolved.directive);
            output::print_detail("Delay (s)", &resolved.delay_seconds.to_string());
        }
        _ => output::print_item(&resolved, format)?,
    }

    Ok(())
}
