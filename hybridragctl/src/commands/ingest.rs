//! One-shot batch ingestion (`ingest`) and forced re-ingest (`sync`).

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use hybridrag_core::error::RagError;
use hybridrag_core::ingest::{BatchPlan, WatcherDaemon};
use hybridrag_core::registry::RecordPatch;
use tokio::sync::watch;

use crate::context::Context;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Database name
    pub name: String,
    /// Ingest from this folder instead of the configured source folder
    #[arg(long)]
    pub folder: Option<PathBuf>,
    /// Discard any interrupted batch and rediscover from scratch
    #[arg(long, conflicts_with_all = ["add", "use"])]
    pub fresh: bool,
    /// Discover and queue files not already pending
    #[arg(long, conflicts_with = "use")]
    pub add: bool,
    /// Resume the existing pending list as-is
    #[arg(long = "use")]
    pub r#use: bool,
}

async fn batch_run(
    context: &Context,
    name: &str,
    folder: Option<PathBuf>,
    plan: BatchPlan,
    skip_dedup_seed: bool,
) -> Result<()> {
    // An explicit --folder is persisted so watch mode keeps following it.
    if let Some(folder) = folder {
        let mut registry = context.registry()?;
        registry.update(
            name,
            RecordPatch {
                source_folder: Some(folder),
                ..Default::default()
            },
        )?;
    }
    let record = context.require_record(name)?;

    let locks = context.locks();
    let Some(guard) = locks.acquire(name, std::process::id())? else {
        let (_, pid) = locks.is_running(name);
        return Err(RagError::LockHeld {
            database: name.to_string(),
            pid,
        }
        .into());
    };

    let (_tx, shutdown) = watch::channel(false);
    let mut daemon = WatcherDaemon::new(
        record,
        context.state(),
        context.registry()?,
        context.alerts(),
        context.engine_factory(),
        guard,
        shutdown,
    )?;
    if skip_dedup_seed {
        daemon = daemon.without_dedup_seed();
    }

    let stats = daemon.run_batch_once(plan).await?;
    println!(
        "Ingestion complete: {} ingested, {} duplicates skipped, {} errors",
        stats.ingested, stats.duplicates_skipped, stats.errors
    );
    if stats.errors > 0 {
        Err(RagError::Internal(format!("{} files failed", stats.errors)).into())
    } else {
        Ok(())
    }
}

pub async fn run(context: &Context, args: IngestArgs) -> Result<()> {
    let plan = if args.fresh {
        BatchPlan::Fresh
    } else if args.add {
        BatchPlan::Add
    } else {
        BatchPlan::Use
    };
    batch_run(context, &args.name, args.folder, plan, false).await
}

pub async fn sync(context: &Context, name: &str, fresh: bool) -> Result<()> {
    // A sync always rescans; --fresh additionally ignores the dedup seed so
    // every file is offered to the engine again.
    batch_run(context, name, None, BatchPlan::Fresh, fresh).await
}
