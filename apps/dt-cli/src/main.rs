//! # dt-cli
//!
//! Command-line interface for DistTrack, the distribution execution and
//! delivery tracking engine:
//! - `dt execution start/list/status/complete/cancel` — drive runs
//! - `dt delivery start/track/arrive/complete/fail` — drive deliveries
//! - `dt issue report/resolve/list/summary` — track field issues
//! - `dt schedule seed/list` — manage the file-backed schedule provider
//! - `dt audit verify/tail/query` — inspect the tamper-evident trail
//! - `dt serve` — start the HTTP JSON API

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dt_execution::{DistConfig, DistributionService};

/// DistTrack CLI — run and track food distribution executions.
#[derive(Parser)]
#[command(name = "dt", version, about)]
struct Cli {
    /// Data directory root (defaults to current directory).
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Actor recorded on mutations (defaults to dt.toml or "operator").
    #[arg(long)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage distribution executions.
    Execution {
        #[command(subcommand)]
        command: commands::execution::ExecutionCommands,
    },
    /// Manage deliveries within an execution.
    Delivery {
        #[command(subcommand)]
        command: commands::delivery::DeliveryCommands,
    },
    /// Report and resolve issues.
    Issue {
        #[command(subcommand)]
        command: commands::issue::IssueCommands,
    },
    /// Manage schedules in the file-backed provider.
    Schedule {
        #[command(subcommand)]
        command: commands::schedule::ScheduleCommands,
    },
    /// Inspect the audit trail.
    Audit {
        #[command(subcommand)]
        command: commands::audit::AuditCommands,
    },
    /// Start the HTTP JSON API server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8642")]
        port: u16,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir.canonicalize().unwrap_or(cli.data_dir);
    let config = DistConfig::load(&data_dir)?;
    let actor = cli.actor.unwrap_or_else(|| config.default_actor.clone());

    match &cli.command {
        Commands::Execution { command } => {
            let service = DistributionService::open(config)?;
            commands::execution::execute(command, &service, &actor)
        }
        Commands::Delivery { command } => {
            let service = DistributionService::open(config)?;
            commands::delivery::execute(command, &service, &actor)
        }
        Commands::Issue { command } => {
            let service = DistributionService::open(config)?;
            commands::issue::execute(command, &service, &actor)
        }
        Commands::Schedule { command } => commands::schedule::execute(command, &config),
        Commands::Audit { command } => commands::audit::execute(command, &config),
        Commands::Serve { port } => commands::serve::execute(config, *port),
    }
}
