//! Configuration inspection commands.
//!
//! Reads the same file and `QUEUELINE__*` environment layering the worker uses.

use anyhow::{Context, Result};
use clap::Subcommand;
use queueline_core::config::Config;
use std::path::PathBuf;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Configuration file
        #[arg(short, long, env = "QUEUELINE_CONFIG")]
        file: Option<PathBuf>,
    },

    /// Show the built-in defaults
    Defaults,

    /// Check that a configuration file loads and validates
    Validate {
        /// Configuration file
        file: PathBuf,
    },
}

fn load(file: Option<&PathBuf>) -> Result<Config> {
    match file {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load().context("Failed to load config from environment"),
    }
}

fn print_config(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_header("Worker");
            output::print_detail("Name", &config.worker.name);
            output::print_detail("Queues", &config.worker.queues.join(", "));
            output::print_detail("Max tries", &config.worker.max_tries.to_string());
            output::print_detail("Sleep", &format!("{:?}", config.worker.sleep));
            output::print_detail("Backoff", &format!("{:?}", config.worker.backoff));

            output::print_header("Queue");
            output::print_detail("Default queue", &config.queue.default_queue);
            output::print_detail("Retry after", &format!("{:?}", config.queue.retry_after));

            output::print_header("Jobs");
            output::print_detail(
                "Missing handler",
                &format!("{:?}", config.jobs.missing_handler),
            );
            output::print_detail("Checkpoints", &config.monitoring.checkpoints.to_string());
            output::print_detail("Log level", &config.logging.level);
            Ok(())
        }
        _ => output::print_item(config, format),
    }
}

pub fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show { file } => {
            let config = load(file.as_ref())?;
            print_config(&config, format)?;
        }

        ConfigCommands::Defaults => print_config(&Config::default(), format)?,

        ConfigCommands::Validate { file } => {
            load(Some(&file))?;
            output::print_success(&format!("{} is valid", file.display()));
        }
    }

    Ok(())
}
