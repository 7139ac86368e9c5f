//! # hybridragctl
//!
//! Operator command line for the HybridRAG ingestion control plane:
//! registry CRUD, watcher daemon lifecycle, one-shot ingestion, the
//! enrichment job, alert management, and diagnostics.
//!
//! Exit codes: 0 success, 1 usage or configuration error, 2 runtime error,
//! 3 lock contention (already running).

mod commands;
mod context;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hybridrag_core::error::RagError;

use commands::{alerts, diag, enrich, ingest, registry, watch};
use context::Context;

pub const EXIT_OK: u8 = 0;
pub const EXIT_USAGE: u8 = 1;
pub const EXIT_RUNTIME: u8 = 2;
pub const EXIT_LOCKED: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "hybridragctl")]
#[command(about = "Manage HybridRAG databases, watchers, and ingestion")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new database in the registry
    Register(registry::RegisterArgs),
    /// Remove a database from the registry (never deletes its files)
    Unregister { name: String },
    /// List registered databases
    List,
    /// Show one database record in full
    Show { name: String },
    /// Update fields of a database record
    Update(registry::UpdateArgs),
    /// One-shot batch ingestion into a database
    Ingest(ingest::IngestArgs),
    /// Forced re-ingest of a database's source folder
    Sync {
        name: String,
        /// Re-insert everything, ignoring the startup dedup seed
        #[arg(long)]
        fresh: bool,
    },
    /// Watcher daemon lifecycle
    #[command(subcommand)]
    Watch(watch::WatchCommand),
    /// Retroactive entity-graph enrichment
    Enrich(enrich::EnrichArgs),
    /// Inspect and manage alerts
    #[command(subcommand)]
    Alerts(alerts::AlertsCommand),
    /// Overall system status
    Status,
    /// Database health diagnostics
    CheckDb { name: String },
    /// Names of registered databases, one per line
    ListDbs,
    /// Database record plus ingestion history
    DbInfo { name: String },
}

/// Map core errors onto the documented exit codes.
fn exit_code_for(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<RagError>() {
        Some(RagError::LockHeld { .. }) => EXIT_LOCKED,
        Some(
            RagError::InvalidName(_)
            | RagError::AlreadyExists(_)
            | RagError::NotFound(_)
            | RagError::Config(_)
            | RagError::MissingSourceFolder(_),
        ) => EXIT_USAGE,
        _ => EXIT_RUNTIME,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version renders go to stdout and exit cleanly.
            if e.use_stderr() {
                eprint!("{e}");
                return ExitCode::from(EXIT_USAGE);
            }
            print!("{e}");
            return ExitCode::from(EXIT_OK);
        }
    };

    let context = match Context::resolve() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let result = match cli.command {
        Command::Register(args) => registry::register(&context, args),
        Command::Unregister { name } => registry::unregister(&context, &name),
        Command::List => registry::list(&context),
        Command::Show { name } => registry::show(&context, &name),
        Command::Update(args) => registry::update(&context, args),
        Command::Ingest(args) => ingest::run(&context, args).await,
        Command::Sync { name, fresh } => ingest::sync(&context, &name, fresh).await,
        Command::Watch(command) => watch::run(&context, command).await,
        Command::Enrich(args) => enrich::run(&context, args).await,
        Command::Alerts(command) => alerts::run(&context, command),
        Command::Status => diag::status(&context),
        Command::CheckDb { name } => diag::check_db(&context, &name),
        Command::ListDbs => diag::list_dbs(&context),
        Command::DbInfo { name } => diag::db_info(&context, &name),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
