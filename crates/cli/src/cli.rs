//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Dispatch CLI - drive the durable event dispatch pipeline from a settings file
#[derive(Parser, Debug)]
#[command(
    name = "dispatch-cli",
    author,
    version,
    about = "Durable event dispatch pipeline",
    long_about = "Queues tracked events durably and delivers them to configured dispatchers.\n\n\
                  Loads settings, opens the queue, registers the built-in dispatchers, \n\
                  tracks events and waits for delivery."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "DISPATCH_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "DISPATCH_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Track events and deliver them to the configured dispatchers
    Run(RunArgs),

    /// Validate settings file without running
    Validate(ValidateArgs),

    /// Display settings and queue information
    Info(InfoArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Run(_) => "run",
            Commands::Validate(_) => "validate",
            Commands::Info(_) => "info",
        }
    }
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to settings file (TOML or JSON)
    #[arg(short, long, default_value = "dispatch.toml", env = "DISPATCH_CONFIG")]
    pub config: PathBuf,

    /// JSON-lines file of events to track
    #[arg(short, long, env = "DISPATCH_EVENTS")]
    pub events: Option<PathBuf>,

    /// Number of synthetic events to track when no events file is given
    #[arg(long, default_value = "10", env = "DISPATCH_COUNT")]
    pub count: usize,

    /// Seconds to wait for delivery (0 = wait forever)
    #[arg(long, default_value = "30", env = "DISPATCH_TIMEOUT")]
    pub timeout: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "DISPATCH_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to settings file to validate
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to settings file
    #[arg(short, long, default_value = "dispatch.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
