//! Retroactive graph enrichment subcommand.

use anyhow::Result;
use clap::Args;
use hybridrag_core::error::RagError;
use hybridrag_core::ingest::{queue_status, EnrichmentOptions, EnrichmentWorker};
use hybridrag_core::logging::init_daemon_logging;
use tracing::info;

use crate::context::Context;

#[derive(Args, Debug)]
pub struct EnrichArgs {
    /// Database name
    pub name: String,
    /// Process at most N files this run
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,
    /// Show what would be processed without calling the engine
    #[arg(long)]
    pub dry_run: bool,
    /// Print queue lengths and exit
    #[arg(long)]
    pub status: bool,
}

pub async fn run(context: &Context, args: EnrichArgs) -> Result<()> {
    if args.status {
        let queue = queue_status(context.state(), &args.name)?;
        println!("Enrichment status: {}", args.name);
        println!("  pending entries       : {}", queue.pending_entries);
        println!("  done entries          : {}", queue.done_entries);
        println!("  unique paths pending  : {}", queue.unique_pending);
        return Ok(());
    }

    let record = context.require_record(&args.name)?;

    let log_file = context.state().enrichment_log_file(&args.name);
    let _writer = init_daemon_logging(log_file)?;
    info!("Enrichment job starting for: {}", args.name);

    let locks = context.locks();
    let Some(guard) = locks.acquire(&args.name, std::process::id())? else {
        let (_, pid) = locks.is_running(&args.name);
        return Err(RagError::LockHeld {
            database: args.name,
            pid,
        }
        .into());
    };

    let shutdown = super::watch::shutdown_channel();
    let worker = EnrichmentWorker::new(
        record,
        context.state(),
        context.engine_factory(),
        guard,
        shutdown,
        EnrichmentOptions {
            limit: args.limit,
            dry_run: args.dry_run,
        },
    );

    let stats = worker.run().await?;
    println!(
        "Enrichment complete: {} enriched, {} already done, {} missing, {} errors",
        stats.enriched, stats.skipped_done, stats.skipped_missing, stats.errors
    );
    Ok(())
}
