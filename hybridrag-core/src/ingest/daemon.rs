//! The per-database watcher daemon.
//!
//! One cooperative loop owns a database end to end: it decides at startup
//! whether to resume an interrupted bulk load, run discovery into a fresh
//! batch, or go straight to steady-state watching; it throttles against
//! system load, deduplicates by content hash, reports to the alert store,
//! and shuts down cleanly on signal.
//!
//! ```text
//!         [DOWN] --acquire-> [STARTING]
//!                               |
//!         (pending list exists) +-> [RESUMING_BATCH] -empty-> [WATCHING]
//!         (doc count == 0)      +-> [DISCOVERING] -> [BATCHING] -empty-> [WATCHING]
//!         (doc count > 0)       +-> [WATCHING]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bounded::BoundedSet;
use crate::control::PauseControl;
use crate::detector::{ChangeDetector, ScanFilters};
use crate::engine::{content_fingerprint, seed_fingerprints, DocStatusFile, RagEngine};
use crate::error::{RagError, Result};
use crate::lock::LockGuard;
use crate::metadata::DatabaseMetadata;
use crate::monitor::{check_json_storage, AlertCenter, AlertSeverity, PerformanceTracker};
use crate::registry::{DatabaseRecord, DatabaseRegistry};
use crate::state::StateRoot;

use super::load::{LoadLevel, LoadMonitor, LoadProbe};
use super::pending::PathListFile;
use super::tuning::BatchTuning;

/// Builds an engine for a database. Injected so tests can substitute a
/// mock; production wires [`crate::engine::HttpRagEngine`].
pub type EngineFactory =
    Arc<dyn Fn(&DatabaseRecord) -> Result<Arc<dyn RagEngine>> + Send + Sync>;

/// In-process counters for one daemon session.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    pub ingested: u64,
    pub duplicates_skipped: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

/// Where the daemon currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherPhase {
    Starting,
    ResumingBatch,
    Discovering,
    Batching,
    Watching,
    ShuttingDown,
}

/// How a one-shot batch run treats an existing pending list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPlan {
    /// Resume the existing pending list; discover only if there is none.
    Use,
    /// Discard any pending list and rediscover from scratch.
    Fresh,
    /// Discover and append paths not already queued.
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOutcome {
    Ingested,
    SkippedEmpty,
    SkippedDuplicate,
    Failed,
}

#[derive(Debug, Default)]
struct CycleTally {
    ingested: usize,
    skipped: usize,
    errors: usize,
}

impl CycleTally {
    fn count(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Ingested => self.ingested += 1,
            FileOutcome::SkippedEmpty | FileOutcome::SkippedDuplicate => self.skipped += 1,
            FileOutcome::Failed => self.errors += 1,
        }
    }
}

pub struct WatcherDaemon {
    record: DatabaseRecord,
    registry: DatabaseRegistry,
    tuning: BatchTuning,
    load: LoadMonitor,
    alerts: Arc<AlertCenter>,
    detector: ChangeDetector,
    dedup: BoundedSet,
    stats: SessionStats,
    perf: PerformanceTracker,
    engine: Option<Arc<dyn RagEngine>>,
    engine_factory: EngineFactory,
    pending: PathListFile,
    enrichment_pending: PathListFile,
    pause: PauseControl,
    shutdown: watch::Receiver<bool>,
    phase: WatcherPhase,
    skip_dedup_seed: bool,
    _lock: LockGuard,
}

impl std::fmt::Debug for WatcherDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherDaemon")
            .field("database", &self.record.name)
            .field("phase", &self.phase)
            .field("stats", &self.stats)
            .finish()
    }
}

impl WatcherDaemon {
    /// Assemble a daemon for a registered database. The caller must already
    /// hold the database's lock; the guard lives as long as the daemon.
    pub fn new(
        record: DatabaseRecord,
        state: &StateRoot,
        registry: DatabaseRegistry,
        alerts: Arc<AlertCenter>,
        engine_factory: EngineFactory,
        lock: LockGuard,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let source_folder = record
            .source_folder
            .clone()
            .ok_or_else(|| RagError::Config(format!("no source folder configured for {}", record.name)))?;
        if !source_folder.exists() {
            return Err(RagError::MissingSourceFolder(source_folder));
        }

        let filters = ScanFilters {
            recursive: record.recursive,
            extensions: Some(record.effective_extensions()),
            specstory_only: record.source_type.specstory_only(),
        };
        let detector = ChangeDetector::new(source_folder, filters);

        let tuning = BatchTuning::default();
        let load = LoadMonitor::new(tuning.load);
        let perf = PerformanceTracker::new(record.thresholds.perf_degradation_pct);

        info!("Loaded database entry: {}", record.name);
        info!("  Source: {:?}", record.source_folder);
        info!("  Interval: {}s", record.watch_interval_sec);
        info!("  Source type: {}", record.source_type);
        info!("  Extensions: {:?}", record.effective_extensions());

        Ok(Self {
            pending: PathListFile::new(state.pending_file(&record.name)),
            enrichment_pending: PathListFile::new(state.enrichment_pending_file(&record.name)),
            pause: PauseControl::new(state.clone(), &record.name),
            record,
            registry,
            tuning,
            load,
            alerts,
            detector,
            dedup: BoundedSet::default(),
            stats: SessionStats::default(),
            perf,
            engine: None,
            engine_factory,
            shutdown,
            phase: WatcherPhase::Starting,
            skip_dedup_seed: false,
            _lock: lock,
        })
    }

    pub fn with_tuning(mut self, tuning: BatchTuning) -> Self {
        self.load = LoadMonitor::new(tuning.load);
        self.tuning = tuning;
        self
    }

    /// Substitute the load probe (tests drive throttling decisions with it).
    pub fn with_load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.load = LoadMonitor::with_probe(self.tuning.load, probe);
        self
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn phase(&self) -> WatcherPhase {
        self.phase
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep, waking early if shutdown is signalled.
    async fn sleep_interruptible(&mut self, duration: Duration) {
        if self.shutdown_requested() {
            return;
        }
        let mut rx = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = rx.changed() => {}
        }
    }

    fn engine(&mut self) -> Result<Arc<dyn RagEngine>> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        info!("Lazy-initializing RAG engine (first use)");
        let engine = (self.engine_factory)(&self.record)?;
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    async fn release_engine(&mut self) {
        if let Some(engine) = self.engine.take() {
            info!("Releasing RAG engine");
            if let Err(e) = engine.close().await {
                debug!("Engine close failed: {e}");
            }
        }
    }

    fn seed_dedup(&mut self) {
        if self.skip_dedup_seed || !self.record.backend.is_json() {
            return;
        }
        match seed_fingerprints(&self.record.path, &mut self.dedup) {
            Ok(count) if count > 0 => {
                info!("Loaded {count} existing document fingerprints");
            }
            Ok(_) => {}
            Err(e) => warn!("Could not seed dedup set from doc-status store: {e}"),
        }
    }

    async fn document_count(&mut self) -> Result<u64> {
        if self.record.backend.is_json() {
            DocStatusFile::new(&self.record.path).document_count()
        } else {
            let engine = self.engine()?;
            Ok(engine.document_count().await?)
        }
    }

    /// Block until load drops below critical, polling on the configured
    /// backoff. Returns immediately on shutdown.
    async fn wait_until_system_ready(&mut self) {
        loop {
            if self.shutdown_requested() {
                return;
            }
            let sample = self.load.sample().await;
            if sample.level != LoadLevel::Critical {
                return;
            }
            info!("Critical load ({}), pausing ingestion", sample.reason);
            let backoff = self.tuning.critical_backoff;
            self.sleep_interruptible(backoff).await;
        }
    }

    /// Shared per-file pipeline: read, dedup, insert, account.
    async fn process_file(&mut self, path: &Path, allow_fast: bool) -> FileOutcome {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(md) if md.is_file() => md,
            Ok(_) => {
                warn!("  Not a regular file: {}", path.display());
                self.stats.errors += 1;
                return FileOutcome::Failed;
            }
            Err(e) => {
                warn!("  Unreadable file {}: {e}", path.display());
                self.stats.errors += 1;
                return FileOutcome::Failed;
            }
        };
        debug!("Processing {} ({} bytes)", path.display(), metadata.len());

        let content = match tokio::fs::read(path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("  Could not read {}: {e}", path.display());
                self.stats.errors += 1;
                return FileOutcome::Failed;
            }
        };
        if content.trim().is_empty() {
            debug!("  Skipped empty file: {}", path.display());
            return FileOutcome::SkippedEmpty;
        }

        let fingerprint = content_fingerprint(&content);
        if self.dedup.contains(&fingerprint) {
            debug!("  Skipped duplicate: {}", path.display());
            self.stats.duplicates_skipped += 1;
            return FileOutcome::SkippedDuplicate;
        }

        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(e) => {
                self.stats.errors += 1;
                self.stats.last_error = Some(e.to_string());
                self.alerts
                    .watcher_error(
                        &self.record.name,
                        AlertSeverity::Error,
                        &format!("engine initialization failed: {e}"),
                        serde_json::Value::Null,
                    )
                    .await;
                self.release_engine().await;
                return FileOutcome::Failed;
            }
        };

        let source_path = path.to_string_lossy();
        let use_fast = allow_fast && engine.supports_fast_insert();
        let inserted = if use_fast {
            engine.insert_fast(&content, &source_path).await
        } else {
            engine.insert(&content, &source_path).await
        };

        match inserted {
            Ok(()) => {
                if use_fast {
                    // Embed-only inserts still owe the graph an entity pass.
                    if let Err(e) = self.enrichment_pending.append(&source_path) {
                        warn!("Could not queue {} for enrichment: {e}", path.display());
                    }
                }
                self.dedup.insert(fingerprint);
                self.stats.ingested += 1;
                info!("  Ingested: {}", path.display());
                FileOutcome::Ingested
            }
            Err(e) => {
                self.stats.errors += 1;
                self.stats.last_error = Some(format!("{}: {e}", path.display()));
                error!("  Failed: {}: {e}", path.display());
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| source_path.to_string());
                self.alerts
                    .ingestion_failed(&self.record.name, &file_name, &e.to_string())
                    .await;
                FileOutcome::Failed
            }
        }
    }

    /// Discovery: one filtered walk of the source folder into the pending
    /// list.
    async fn discover(&mut self) -> Result<usize> {
        let Some(folder) = &self.record.source_folder else {
            return Ok(0);
        };
        info!("Discovery: scanning {}", folder.display());
        let files = self.detector.scan_files().await?;
        let mut paths: Vec<String> = files
            .keys()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        paths.sort();
        self.pending.rewrite(&paths)?;
        info!(
            "Discovered {} files, saved to {}",
            paths.len(),
            self.pending.path().display()
        );
        Ok(paths.len())
    }

    /// Bulk mode: drain the pending list batch by batch, rewriting the list
    /// after every batch as the crash-safe resume point.
    async fn run_batch_mode(&mut self) -> Result<()> {
        let mut pending = self.pending.load()?;
        if pending.is_empty() {
            info!("No pending files, batch mode skipped");
            self.pending.remove()?;
            return Ok(());
        }

        let total = pending.len();
        info!("Batch mode starting: {total} files pending");
        info!(
            "  Batch size: {} (normal) / {} (high load)",
            self.tuning.batch_size_normal, self.tuning.batch_size_low
        );

        let mut tally = CycleTally::default();
        let mut batch_num = 0usize;

        while !pending.is_empty() {
            if self.shutdown_requested() {
                info!("Shutdown requested, leaving batch mode");
                break;
            }
            self.wait_until_system_ready().await;
            if self.shutdown_requested() {
                break;
            }

            let sample = self.load.sample().await;
            let batch_size = if sample.level == LoadLevel::High {
                info!(
                    "High load detected ({}), reduced batch size: {}",
                    sample.reason, self.tuning.batch_size_low
                );
                self.tuning.batch_size_low
            } else {
                self.tuning.batch_size_normal
            };

            batch_num += 1;
            let take = batch_size.min(pending.len());
            info!(
                "Batch {batch_num}: processing {take} files ({} remaining after)",
                pending.len() - take
            );

            let mut processed = 0;
            for entry in pending.iter().take(take) {
                if self.shutdown_requested() {
                    break;
                }
                let outcome = self.process_file(Path::new(entry), true).await;
                tally.count(outcome);
                processed += 1;
            }

            pending.drain(0..processed);
            self.pending.rewrite(&pending)?;

            if let Err(e) = self.registry.update_last_sync(&self.record.name) {
                warn!("Could not update last_sync: {e}");
            }

            let done = total - pending.len();
            info!(
                "  Progress: {:.1}% ({done}/{total}), +{} ingested, ~{} skipped, x{} errors",
                done as f64 / total as f64 * 100.0,
                tally.ingested,
                tally.skipped,
                tally.errors
            );

            if !pending.is_empty() {
                let pause = self.tuning.sleep_between_batches;
                self.sleep_interruptible(pause).await;
            }
        }

        if pending.is_empty() {
            info!(
                "Batch mode complete: +{} ingested, ~{} skipped, x{} errors",
                tally.ingested, tally.skipped, tally.errors
            );
            self.pending.remove()?;
            self.record_history(&tally, "batch mode");
        }
        Ok(())
    }

    fn record_history(&self, tally: &CycleTally, label: &str) {
        if tally.ingested == 0 {
            return;
        }
        let Some(folder) = &self.record.source_folder else {
            return;
        };
        let notes = format!(
            "{label}: +{} ingested, ~{} skipped, x{} errors",
            tally.ingested, tally.skipped, tally.errors
        );
        let result = DatabaseMetadata::open(&self.record.path).and_then(|mut meta| {
            meta.add_source_folder(folder, self.record.recursive)?;
            meta.record_ingestion(folder, tally.ingested as u64, tally.errors == 0, &notes)
        });
        if let Err(e) = result {
            warn!("Failed to record ingestion metadata: {e}");
        }
    }

    /// One watch-mode ingest cycle over the detected changes.
    async fn ingest_changes(&mut self, to_process: &[std::path::PathBuf]) {
        let total = to_process.len();
        info!(
            "Processing {total} changed file(s) in batches of {}",
            self.tuning.batch_size_normal
        );
        let started = Instant::now();
        let mut tally = CycleTally::default();

        for chunk in to_process.chunks(self.tuning.batch_size_normal) {
            if self.shutdown_requested() {
                break;
            }
            for path in chunk {
                if self.shutdown_requested() {
                    break;
                }
                let outcome = self.process_file(path, false).await;
                tally.count(outcome);
            }
            if let Err(e) = self.registry.update_last_sync(&self.record.name) {
                warn!("Could not update last_sync: {e}");
            }
        }

        info!(
            "Cycle complete: +{} ingested, ~{} skipped, x{} errors (session: {} ingested, {} skipped, {} errors)",
            tally.ingested,
            tally.skipped,
            tally.errors,
            self.stats.ingested,
            self.stats.duplicates_skipped,
            self.stats.errors
        );

        self.record_history(&tally, "watch cycle");

        if tally.ingested > 0 {
            let elapsed = started.elapsed().as_secs_f64();
            if let Some(warning) = self.perf.record(tally.ingested, elapsed) {
                warn!(
                    "Performance degradation: current {:.1} docs/min is {:.0}% below baseline {:.1} docs/min",
                    warning.current_rate, warning.degradation_pct, warning.baseline_rate
                );
                let details = serde_json::json!({
                    "baseline_rate": warning.baseline_rate,
                    "current_rate": warning.current_rate,
                    "degradation_pct": warning.degradation_pct,
                    "threshold_pct": warning.threshold_pct,
                    "recommendation": "JSON storage may be oversized; consider migrating to the postgres backend",
                });
                self.alerts
                    .watcher_error(
                        &self.record.name,
                        AlertSeverity::Warning,
                        &format!(
                            "performance degraded by {:.0}%",
                            warning.degradation_pct
                        ),
                        details,
                    )
                    .await;
            }
        }

        if tally.errors > 0 {
            self.alerts
                .ingestion_partial(&self.record.name, total, tally.errors)
                .await;
        }
    }

    async fn check_storage(&self) {
        if !self.record.backend.is_json() {
            return;
        }
        let findings = match check_json_storage(&self.record.path, &self.record.thresholds) {
            Ok(findings) => findings,
            Err(e) => {
                warn!("Storage size check failed: {e}");
                return;
            }
        };
        for finding in findings {
            warn!("Storage: {}", finding.describe());
            let severity = finding.severity();
            let details = serde_json::to_value(&finding).unwrap_or(serde_json::Value::Null);
            self.alerts
                .watcher_error(
                    &self.record.name,
                    severity,
                    &format!("JSON storage pressure: {}", finding.describe()),
                    details,
                )
                .await;
        }
    }

    /// Idle while an operator holds the pause file.
    async fn honor_pause(&mut self) {
        if !self.pause.pause_requested() {
            return;
        }
        info!("Pause requested, idling");
        if let Err(e) = self.pause.acknowledge() {
            warn!("Could not acknowledge pause: {e}");
        }
        while self.pause.pause_requested() && !self.shutdown_requested() {
            self.sleep_interruptible(Duration::from_secs(1)).await;
        }
        self.pause.clear_ack();
        if !self.shutdown_requested() {
            info!("Pause lifted, resuming watch");
        }
    }

    /// Steady state: poll for changes on the configured interval.
    async fn run_watch_mode(&mut self) -> Result<()> {
        let tracked = self.detector.baseline().await?;
        info!("Watch mode: baseline established with {tracked} file(s) tracked");
        info!(
            "Checking for changes every {}s",
            self.record.watch_interval_sec
        );

        while !self.shutdown_requested() {
            self.honor_pause().await;
            if self.shutdown_requested() {
                break;
            }

            let changes = self.detector.detect_changes().await?;
            if !changes.new.is_empty() || !changes.modified.is_empty() {
                info!(
                    "Changes detected: +{} new, ~{} modified, -{} deleted",
                    changes.new.len(),
                    changes.modified.len(),
                    changes.deleted.len()
                );
                let to_process = changes.to_process();
                if to_process.len() >= self.tuning.batch_size_normal {
                    info!("Large change burst ({} files), checking load first", to_process.len());
                    self.wait_until_system_ready().await;
                }
                if !self.shutdown_requested() {
                    self.ingest_changes(&to_process).await;
                }
            } else {
                debug!("No changes detected");
            }

            self.check_storage().await;

            let interval = Duration::from_secs(self.record.watch_interval_sec);
            self.sleep_interruptible(interval).await;
        }
        Ok(())
    }

    async fn run_inner(&mut self) -> Result<()> {
        self.seed_dedup();

        if self.pending.exists() {
            self.phase = WatcherPhase::ResumingBatch;
            let count = self.pending.load()?.len();
            info!("Pending list detected ({count} files), resuming batch mode");
            self.run_batch_mode().await?;
        } else {
            let doc_count = self.document_count().await?;
            info!("Database status: {doc_count} documents");
            if doc_count == 0 {
                self.phase = WatcherPhase::Discovering;
                info!("Empty database, running initial bulk ingestion");
                let discovered = self.discover().await?;
                if discovered > 0 {
                    self.phase = WatcherPhase::Batching;
                    self.run_batch_mode().await?;
                } else {
                    info!("No files discovered, starting watch mode");
                }
            } else {
                info!("Database populated, starting watch mode");
            }
        }

        if !self.shutdown_requested() {
            self.phase = WatcherPhase::Watching;
            self.run_watch_mode().await?;
        }
        Ok(())
    }

    /// One-shot batch ingestion: run discovery per the plan, drain the
    /// pending list, and return without entering watch mode. Used by the
    /// `ingest` and `sync` commands.
    pub async fn run_batch_once(mut self, plan: BatchPlan) -> Result<SessionStats> {
        self.seed_dedup();

        match plan {
            BatchPlan::Fresh => {
                self.pending.remove()?;
                self.phase = WatcherPhase::Discovering;
                self.discover().await?;
            }
            BatchPlan::Add => {
                let existing = self.pending.load()?;
                self.phase = WatcherPhase::Discovering;
                let files = self.detector.scan_files().await?;
                let mut merged = existing.clone();
                let known: std::collections::HashSet<&String> = existing.iter().collect();
                let mut discovered: Vec<String> = files
                    .keys()
                    .map(|p| p.to_string_lossy().to_string())
                    .filter(|p| !known.contains(p))
                    .collect();
                discovered.sort();
                let added = discovered.len();
                merged.extend(discovered);
                self.pending.rewrite(&merged)?;
                info!("Queued {added} additional files ({} total)", merged.len());
            }
            BatchPlan::Use => {
                if !self.pending.exists() {
                    self.phase = WatcherPhase::Discovering;
                    self.discover().await?;
                }
            }
        }

        self.phase = WatcherPhase::Batching;
        let result = self.run_batch_mode().await;
        self.phase = WatcherPhase::ShuttingDown;
        self.release_engine().await;
        result.map(|()| self.stats)
    }

    /// Skip seeding the dedup set from the doc-status store. Forced
    /// re-ingest (`sync --fresh`) uses this so every file reaches the
    /// engine again.
    pub fn without_dedup_seed(mut self) -> Self {
        self.skip_dedup_seed = true;
        self
    }

    /// Drive the daemon to completion. Consumes the daemon; the lock guard
    /// is released on return.
    pub async fn run(mut self) -> Result<SessionStats> {
        info!("Watcher started for: {}", self.record.name);
        let result = self.run_inner().await;
        self.phase = WatcherPhase::ShuttingDown;
        self.release_engine().await;

        match result {
            Ok(()) => {
                info!("Watcher stopped");
                if self.stats.errors > 0 {
                    let details =
                        serde_json::to_value(&self.stats).unwrap_or(serde_json::Value::Null);
                    self.alerts
                        .info(
                            &self.record.name,
                            &format!("Watcher stopped with {} total errors", self.stats.errors),
                            details,
                        )
                        .await;
                }
                Ok(self.stats)
            }
            Err(e) => {
                error!("Watcher error: {e}");
                let details = serde_json::to_value(&self.stats).unwrap_or(serde_json::Value::Null);
                self.alerts
                    .watcher_stopped(&self.record.name, &e.to_string(), details)
                    .await;
                Err(e)
            }
        }
    }
}
