//! Retroactive graph enrichment.
//!
//! Bulk loads may insert embed-only (`insert_fast`): documents become
//! queryable by vector search immediately but carry no entities or
//! relations. This worker replays the full pipeline over every path the
//! watcher queued, marking each done in a separate cursor file so a crash
//! resumes exactly where it left off.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::engine::{content_fingerprint, DocStatusFile, RagEngine};
use crate::error::Result;
use crate::lock::LockGuard;
use crate::registry::DatabaseRecord;
use crate::state::StateRoot;

use super::daemon::EngineFactory;
use super::load::{LoadLevel, LoadMonitor};
use super::pending::PathListFile;
use super::tuning::LoadThresholds;

const CRITICAL_NAP: Duration = Duration::from_secs(30);
const HIGH_NAP: Duration = Duration::from_secs(5);
const BETWEEN_FILES: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Clone, Serialize)]
pub struct EnrichmentStats {
    pub enriched: u64,
    pub skipped_done: u64,
    pub skipped_missing: u64,
    pub errors: u64,
}

/// Queue lengths reported by `--status`.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub pending_entries: usize,
    pub done_entries: usize,
    pub unique_pending: usize,
}

/// Options for one enrichment run.
#[derive(Debug, Default, Clone)]
pub struct EnrichmentOptions {
    /// Process at most this many files this run.
    pub limit: Option<usize>,
    /// Report the work list without calling the engine.
    pub dry_run: bool,
}

pub struct EnrichmentWorker {
    record: DatabaseRecord,
    pending: PathListFile,
    done: PathListFile,
    load: LoadMonitor,
    engine_factory: EngineFactory,
    shutdown: watch::Receiver<bool>,
    options: EnrichmentOptions,
    _lock: LockGuard,
}

impl std::fmt::Debug for EnrichmentWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentWorker")
            .field("database", &self.record.name)
            .field("options", &self.options)
            .finish()
    }
}

/// Compute queue status without taking the lock; read-only.
pub fn queue_status(state: &StateRoot, database: &str) -> Result<QueueStatus> {
    let pending = PathListFile::new(state.enrichment_pending_file(database)).load()?;
    let done = PathListFile::new(state.enrichment_done_file(database)).load_set()?;
    let unique_pending = {
        let mut seen = std::collections::HashSet::new();
        pending
            .iter()
            .filter(|p| !done.contains(*p) && seen.insert(p.as_str()))
            .count()
    };
    Ok(QueueStatus {
        pending_entries: pending.len(),
        done_entries: done.len(),
        unique_pending,
    })
}

impl EnrichmentWorker {
    pub fn new(
        record: DatabaseRecord,
        state: &StateRoot,
        engine_factory: EngineFactory,
        lock: LockGuard,
        shutdown: watch::Receiver<bool>,
        options: EnrichmentOptions,
    ) -> Self {
        Self {
            pending: PathListFile::new(state.enrichment_pending_file(&record.name)),
            done: PathListFile::new(state.enrichment_done_file(&record.name)),
            load: LoadMonitor::new(LoadThresholds::default()),
            record,
            engine_factory,
            shutdown,
            options,
            _lock: lock,
        }
    }

    /// Substitute the load probe (tests drive the throttling naps with it).
    pub fn with_load_probe(mut self, probe: std::sync::Arc<dyn super::load::LoadProbe>) -> Self {
        self.load = LoadMonitor::with_probe(LoadThresholds::default(), probe);
        self
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Pending minus done, deduplicated, order preserved.
    fn build_work_list(&self) -> Result<Vec<String>> {
        let pending = self.pending.load()?;
        if pending.is_empty() {
            info!("Enrichment queue is empty, nothing to do");
            return Ok(Vec::new());
        }
        let done = self.done.load_set()?;
        info!("Pending: {} | already done: {}", pending.len(), done.len());

        let mut seen = std::collections::HashSet::new();
        let mut work: Vec<String> = pending
            .into_iter()
            .filter(|p| !done.contains(p) && seen.insert(p.clone()))
            .collect();

        info!("Remaining to enrich: {}", work.len());
        if let Some(limit) = self.options.limit {
            work.truncate(limit);
            info!("Limit applied: processing {} files this run", work.len());
        }
        Ok(work)
    }

    fn mark_done(&self, path: &str) -> Result<()> {
        self.done.append(path)
    }

    /// Rewrite the pending list without entries that now appear in done.
    fn compact_pending(&self) -> Result<()> {
        let done = self.done.load_set()?;
        let all = self.pending.load()?;
        let remaining: Vec<String> = all.iter().filter(|p| !done.contains(*p)).cloned().collect();
        let removed = all.len() - remaining.len();
        self.pending.rewrite(&remaining)?;
        info!(
            "Compacted enrichment queue: removed {removed} done entries, {} still pending",
            remaining.len()
        );
        Ok(())
    }

    async fn nap_for_load(&mut self) {
        let sample = self.load.sample().await;
        match sample.level {
            LoadLevel::Critical => {
                warn!("Critical system load ({}), pausing 30s", sample.reason);
                tokio::time::sleep(CRITICAL_NAP).await;
            }
            LoadLevel::High => {
                info!("High load ({}), pausing 5s before next file", sample.reason);
                tokio::time::sleep(HIGH_NAP).await;
            }
            LoadLevel::Normal => {}
        }
    }

    pub async fn run(mut self) -> Result<EnrichmentStats> {
        let work = self.build_work_list()?;
        let mut stats = EnrichmentStats::default();
        if work.is_empty() {
            return Ok(stats);
        }

        if self.options.dry_run {
            info!("[dry-run] Would enrich {} files:", work.len());
            for path in work.iter().take(10) {
                info!("  {path}");
            }
            if work.len() > 10 {
                info!("  ... and {} more", work.len() - 10);
            }
            return Ok(stats);
        }

        info!("Initializing RAG engine");
        let engine: Arc<dyn RagEngine> = (self.engine_factory)(&self.record)?;
        let doc_status = DocStatusFile::new(&self.record.path);
        let total = work.len();
        let run_start = Instant::now();

        for (idx, path_str) in work.iter().enumerate() {
            if self.shutdown_requested() {
                info!("Stopping on signal");
                break;
            }
            let prefix = format!("[{}/{total}]", idx + 1);
            let path = Path::new(path_str);

            // A deleted source file will never come back; tombstone it.
            if !path.exists() {
                warn!("{prefix} File gone, marking done: {path_str}");
                self.mark_done(path_str)?;
                stats.skipped_missing += 1;
                continue;
            }

            let content = match tokio::fs::read(path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("{prefix} Could not read {path_str}: {e}");
                    stats.errors += 1;
                    continue;
                }
            };
            if content.trim().is_empty() {
                warn!("{prefix} Empty file, marking done");
                self.mark_done(path_str)?;
                stats.skipped_missing += 1;
                continue;
            }

            // Idempotency guard: the full pipeline may already have run for
            // this content via the realtime path.
            let fingerprint = content_fingerprint(&content);
            if doc_status.is_done(&fingerprint) {
                info!("{prefix} Already fully processed, marking done: {path_str}");
                self.mark_done(path_str)?;
                stats.skipped_done += 1;
                continue;
            }

            self.nap_for_load().await;

            info!("{prefix} Enriching: {path_str}");
            let file_start = Instant::now();
            match engine.insert(&content, path_str).await {
                Ok(()) => {
                    self.mark_done(path_str)?;
                    stats.enriched += 1;
                    info!(
                        "{prefix} Enriched in {:.1}s ({:.1}% complete)",
                        file_start.elapsed().as_secs_f64(),
                        (idx + 1) as f64 / total as f64 * 100.0
                    );
                }
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        "{prefix} Failed after {:.1}s: {path_str}: {e}",
                        file_start.elapsed().as_secs_f64()
                    );
                    // Not marked done: the next run retries it.
                }
            }

            tokio::time::sleep(BETWEEN_FILES).await;
        }

        if let Err(e) = engine.close().await {
            warn!("Engine close failed: {e}");
        }

        info!("Enrichment run complete");
        info!("  Enriched       : {}", stats.enriched);
        info!("  Skipped (done) : {}", stats.skipped_done);
        info!("  Skipped (gone) : {}", stats.skipped_missing);
        info!("  Errors         : {}", stats.errors);
        info!("  Total time     : {:.0}s", run_start.elapsed().as_secs_f64());

        self.compact_pending()?;
        Ok(stats)
    }
}
