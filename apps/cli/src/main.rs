//! Relay CLI - command-line interface for the Relay task orchestrator
//!
//! Provides a `relay` command for inspecting the model catalog and running
//! tasks through ranked failover.

mod commands;
mod context;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::types::{ModelsCommand, TaskCommand};
use commands::{models, task};

/// Relay - route tasks across model providers with automatic failover
#[derive(Parser, Debug)]
#[command(name = "relay", author, version, about = "Relay - task orchestration with model failover")]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Configuration file (defaults to ./relay.toml, then ~/.relay/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite task database (defaults to an in-memory store)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Answer from scripted in-process providers instead of real APIs
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect the model catalog
    #[command(subcommand)]
    Models(ModelsCommand),

    /// Submit and manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let options = context::GlobalOptions { config: args.config, db: args.db, mock: args.mock };

    match args.command {
        Command::Models(cmd) => models::execute(cmd, &options).await,
        Command::Task(cmd) => task::execute(cmd, &options).await,
    }
}
