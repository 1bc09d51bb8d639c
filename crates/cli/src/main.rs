//! # Dispatch CLI
//!
//! Drives the dispatch core from a settings file: track a batch of events and
//! wait for delivery, check a settings file, or inspect what is still queued.

mod cli;
mod commands;
mod error;

use anyhow::Result;
use clap::Parser;
use observability::ObservabilityConfig;
use tracing::{error, info};

use cli::{Cli, Commands, LogFormat};
use commands::{run_dispatch, run_info, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    observability::init_with_config(observability_config(&cli))?;
    info!(version = env!("CARGO_PKG_VERSION"), command = cli.command.name(), "Dispatch CLI starting");

    let result = match &cli.command {
        Commands::Run(args) => run_dispatch(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

/// Map global flags onto the shared tracing/metrics setup
///
/// `RUST_LOG` still overrides the level chosen here. Only `run` exports
/// metrics, and only with a non-zero port.
fn observability_config(cli: &Cli) -> ObservabilityConfig {
    let default_log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let log_format = match cli.log_format {
        LogFormat::Json => observability::LogFormat::Json,
        LogFormat::Pretty => observability::LogFormat::Pretty,
        LogFormat::Compact => observability::LogFormat::Compact,
    };
    let metrics_port = match &cli.command {
        Commands::Run(args) if args.metrics_port != 0 => Some(args.metrics_port),
        _ => None,
    };

    ObservabilityConfig {
        log_format,
        metrics_port,
        default_log_level: default_log_level.to_string(),
    }
}
