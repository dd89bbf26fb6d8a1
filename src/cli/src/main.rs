//! Queueline CLI - inspect job payloads and run jobs against an in-memory queue.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use queueline_core::telemetry::{init_telemetry, LogFormat, LoggingConfig};

use commands::{config, delay, parse, run};
use output::OutputFormat;

/// Queueline - queue job execution toolkit
#[derive(Parser)]
#[command(
    name = "queueline",
    version = "0.1.0",
    about = "Queueline - queue job execution toolkit",
    long_about = "CLI tool for decoding job payloads, resolving retry delays, and running jobs through a local worker.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Emit debug logs while running
    #[arg(short, long, global = true, env = "QUEUELINE_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a raw job payload
    Parse(parse::ParseArgs),

    /// Resolve a retry directive to a delay in seconds
    Delay(delay::DelayArgs),

    /// Push payloads from a file and drain them through a worker
    Run(run::RunArgs),

    /// Configuration inspection
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    if cli.verbose {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Compact,
            ..LoggingConfig::default()
        };
        if let Err(e) = init_telemetry(&logging) {
            output::print_warning(&format!("Logging disabled: {:#}", e));
        }
    }

    let format = cli.output;

    let result = match cli.command {
        Commands::Parse(args) => parse::execute(args, format),
        Commands::Delay(args) => delay::execute(args, format),
        Commands::Run(args) => run::execute(args, format).await,
        Commands::Config(cmd) => config::execute(cmd, format),
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
