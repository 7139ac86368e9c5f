//! End-to-end flows for the watcher daemon: discovery + batch + watch,
//! idempotent re-runs, crash-safe batch resume, lock exclusion, and
//! load-adaptive batching.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{factory_for, wait_for, RecordingEngine, TestWorld};
use hybridrag_core::ingest::{
    BatchPlan, BatchTuning, LoadProbe, PathListFile, WatcherDaemon,
};
use hybridrag_core::lock::LockManager;
use hybridrag_core::monitor::AlertCenter;
use tokio::sync::watch;

/// Probe with test-controlled readings; defaults to an idle machine.
#[derive(Debug)]
struct SettableProbe {
    cpu_x10: AtomicU32,
}

impl SettableProbe {
    fn idle() -> Arc<Self> {
        Arc::new(Self {
            cpu_x10: AtomicU32::new(100),
        })
    }

    fn set_cpu(&self, pct: f32) {
        self.cpu_x10.store((pct * 10.0) as u32, Ordering::SeqCst);
    }
}

#[async_trait]
impl LoadProbe for SettableProbe {
    async fn cpu_mem_pct(&self) -> (f32, f32) {
        (self.cpu_x10.load(Ordering::SeqCst) as f32 / 10.0, 20.0)
    }
}

fn fast_tuning() -> BatchTuning {
    BatchTuning {
        sleep_between_batches: Duration::from_millis(100),
        critical_backoff: Duration::from_millis(200),
        ..BatchTuning::default()
    }
}

struct DaemonParts {
    daemon: WatcherDaemon,
    shutdown_tx: watch::Sender<bool>,
}

fn build_daemon(
    world: &TestWorld,
    name: &str,
    engine: Arc<RecordingEngine>,
    probe: Arc<SettableProbe>,
    tuning: BatchTuning,
) -> DaemonParts {
    let record = world
        .registry()
        .get(name)
        .expect("database must be registered");
    let locks = LockManager::new(world.state.clone());
    let guard = locks
        .acquire(name, std::process::id())
        .unwrap()
        .expect("lock must be free");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let alerts = Arc::new(AlertCenter::new(world.state.alerts_file()));
    let daemon = WatcherDaemon::new(
        record,
        &world.state,
        world.registry(),
        alerts,
        factory_for(engine),
        guard,
        shutdown_rx,
    )
    .unwrap()
    .with_tuning(tuning)
    .with_load_probe(probe);
    DaemonParts {
        daemon,
        shutdown_tx,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_database_discovers_batches_then_watches() {
    let world = TestWorld::new();
    world.register_db("notes");
    for i in 0..23 {
        world.write_source_file(&format!("doc{i:02}.md"), &format!("document {i}"));
    }
    // A file the extension filter must exclude.
    world.write_source_file("ignored.txt", "not markdown");

    let engine = RecordingEngine::new(&world.db_path);
    let parts = build_daemon(
        &world,
        "notes",
        engine.clone(),
        SettableProbe::idle(),
        fast_tuning(),
    );
    let pending = PathListFile::new(world.state.pending_file("notes"));
    let shutdown_tx = parts.shutdown_tx;
    let handle = tokio::spawn(parts.daemon.run());

    // Discovery writes the pending list, batch mode drains and deletes it.
    let engine_probe = engine.clone();
    assert!(
        wait_for(
            || engine_probe.insert_count() == 23,
            Duration::from_secs(20)
        )
        .await,
        "all 23 discovered files should be ingested"
    );
    let pending_probe = pending.clone();
    assert!(
        wait_for(|| !pending_probe.exists(), Duration::from_secs(10)).await,
        "pending list should be deleted after batch completion"
    );

    // Give the watch loop a moment to establish its baseline scan, then a
    // new file must be picked up within the watch interval.
    tokio::time::sleep(Duration::from_millis(500)).await;
    world.write_source_file("note.md", "a brand new note");
    let engine_probe = engine.clone();
    assert!(
        wait_for(
            || engine_probe.insert_count() == 24,
            Duration::from_secs(15)
        )
        .await,
        "watch mode should ingest the new file"
    );

    // Duplicate content under a new name is skipped, not re-inserted.
    world.write_source_file("copy-of-doc00.md", "document 0");
    tokio::time::sleep(Duration::from_secs(3)).await;

    shutdown_tx.send(true).unwrap();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.ingested, 24);
    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(engine.insert_count(), 24, "duplicate never reached the engine");

    // The engine-owned doc-status store now has one entry per document.
    let registered = world.registry().get("notes").unwrap();
    assert!(registered.last_sync_at.is_some(), "last_sync was stamped");
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_over_unchanged_folder_ingests_nothing() {
    let world = TestWorld::new();
    world.register_db("notes");
    for i in 0..5 {
        world.write_source_file(&format!("doc{i}.md"), &format!("content {i}"));
    }

    let engine1 = RecordingEngine::new(&world.db_path);
    let parts = build_daemon(
        &world,
        "notes",
        engine1.clone(),
        SettableProbe::idle(),
        fast_tuning(),
    );
    drop(parts.shutdown_tx);
    let stats1 = parts.daemon.run_batch_once(BatchPlan::Use).await.unwrap();
    assert_eq!(stats1.ingested, 5);

    // Fresh engine, same database directory: the doc-status store seeds the
    // dedup set, so rediscovery inserts nothing.
    let engine2 = RecordingEngine::new(&world.db_path);
    let parts = build_daemon(
        &world,
        "notes",
        engine2.clone(),
        SettableProbe::idle(),
        fast_tuning(),
    );
    drop(parts.shutdown_tx);
    let stats2 = parts.daemon.run_batch_once(BatchPlan::Fresh).await.unwrap();

    assert_eq!(stats2.ingested, 0);
    assert_eq!(stats2.duplicates_skipped, 5);
    assert_eq!(engine2.insert_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupted_batch_resumes_each_file_exactly_once() {
    let world = TestWorld::new();
    world.register_db("notes");
    let mut expected = Vec::new();
    for i in 0..5 {
        let path = world.write_source_file(&format!("doc{i}.md"), &format!("content {i}"));
        expected.push(path.to_string_lossy().to_string());
    }
    expected.sort();

    let pending = PathListFile::new(world.state.pending_file("notes"));
    pending.rewrite(&expected).unwrap();

    let tuning = BatchTuning {
        batch_size_normal: 2,
        ..fast_tuning()
    };

    // First run is killed after its first batch of two inserts.
    let engine1 = RecordingEngine::new(&world.db_path);
    let parts = build_daemon(
        &world,
        "notes",
        engine1.clone(),
        SettableProbe::idle(),
        tuning.clone(),
    );
    engine1.trigger_shutdown_after(2, parts.shutdown_tx);
    let stats1 = parts.daemon.run_batch_once(BatchPlan::Use).await.unwrap();
    assert_eq!(stats1.ingested, 2);
    assert_eq!(pending.load().unwrap().len(), 3, "progress was checkpointed");

    // Restart processes only the remainder.
    let engine2 = RecordingEngine::new(&world.db_path);
    let parts = build_daemon(
        &world,
        "notes",
        engine2.clone(),
        SettableProbe::idle(),
        tuning,
    );
    drop(parts.shutdown_tx);
    let stats2 = parts.daemon.run_batch_once(BatchPlan::Use).await.unwrap();
    assert_eq!(stats2.ingested, 3);
    assert!(!pending.exists(), "queue removed once drained");

    // Union covers every file with no overlap.
    let mut all: Vec<String> = engine1.inserted_paths();
    all.extend(engine2.inserted_paths());
    all.sort();
    assert_eq!(all, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_excludes_second_owner_until_release() {
    let world = TestWorld::new();
    let locks = LockManager::new(world.state.clone());
    let pid = std::process::id();

    let guard = locks.acquire("notes", pid).unwrap().expect("first wins");
    assert!(
        locks.acquire("notes", pid + 1).unwrap().is_none(),
        "second acquire must lose"
    );
    let (running, seen_pid) = locks.is_running("notes");
    assert!(running);
    assert_eq!(seen_pid, Some(pid));

    drop(guard);
    assert!(
        locks.acquire("notes", pid).unwrap().is_some(),
        "lock is free again after release"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn high_load_reduces_batch_size_until_pressure_drops() {
    let world = TestWorld::new();
    world.register_db("notes");
    let mut queued = Vec::new();
    for i in 0..4 {
        let path = world.write_source_file(&format!("doc{i}.md"), &format!("content {i}"));
        queued.push(path.to_string_lossy().to_string());
    }
    queued.sort();
    let pending = PathListFile::new(world.state.pending_file("notes"));
    pending.rewrite(&queued).unwrap();

    let tuning = BatchTuning {
        batch_size_normal: 3,
        batch_size_low: 2,
        sleep_between_batches: Duration::from_secs(1),
        ..fast_tuning()
    };

    let probe = SettableProbe::idle();
    probe.set_cpu(92.0);

    let engine = RecordingEngine::new(&world.db_path);
    let parts = build_daemon(&world, "notes", engine.clone(), probe.clone(), tuning);
    let _shutdown_tx = parts.shutdown_tx;
    let handle = tokio::spawn(parts.daemon.run_batch_once(BatchPlan::Use));

    // Under high load the first batch is the reduced size: after exactly two
    // inserts the checkpoint shows two entries left of four.
    let engine_probe = engine.clone();
    assert!(
        wait_for(|| engine_probe.insert_count() == 2, Duration::from_secs(15)).await,
        "first reduced batch should land"
    );
    let pending_probe = pending.clone();
    assert!(
        wait_for(
            || pending_probe.load().map(|p| p.len() == 2).unwrap_or(false),
            Duration::from_secs(2)
        )
        .await,
        "checkpoint after a high-load batch should hold 4 - 2 = 2 entries"
    );

    // Pressure drops; the run finishes at the normal batch size.
    probe.set_cpu(10.0);
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.ingested, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn critical_load_pauses_ingestion_until_it_clears() {
    let world = TestWorld::new();
    world.register_db("notes");
    let path = world.write_source_file("doc.md", "content");
    let pending = PathListFile::new(world.state.pending_file("notes"));
    pending
        .rewrite(&[path.to_string_lossy().to_string()])
        .unwrap();

    let probe = SettableProbe::idle();
    probe.set_cpu(97.0);

    let engine = RecordingEngine::new(&world.db_path);
    let parts = build_daemon(
        &world,
        "notes",
        engine.clone(),
        probe.clone(),
        fast_tuning(),
    );
    let _shutdown_tx = parts.shutdown_tx;
    let handle = tokio::spawn(parts.daemon.run_batch_once(BatchPlan::Use));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(engine.insert_count(), 0, "nothing runs at critical load");

    probe.set_cpu(10.0);
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.ingested, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn fast_insert_queues_paths_for_enrichment() {
    let world = TestWorld::new();
    world.register_db("notes");
    for i in 0..3 {
        world.write_source_file(&format!("doc{i}.md"), &format!("content {i}"));
    }

    let engine = RecordingEngine::with_fast_insert(&world.db_path);
    let parts = build_daemon(
        &world,
        "notes",
        engine.clone(),
        SettableProbe::idle(),
        fast_tuning(),
    );
    drop(parts.shutdown_tx);
    let stats = parts.daemon.run_batch_once(BatchPlan::Use).await.unwrap();
    assert_eq!(stats.ingested, 3);

    let calls = engine.inserts.lock().unwrap();
    assert!(calls.iter().all(|c| c.fast), "batch mode used the fast path");
    drop(calls);

    let queue = PathListFile::new(world.state.enrichment_pending_file("notes"));
    assert_eq!(queue.load().unwrap().len(), 3, "every fast insert was queued");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_inserts_are_counted_and_alerted() {
    let world = TestWorld::new();
    world.register_db("notes");
    let good = world.write_source_file("good.md", "fine");
    let bad = world.write_source_file("bad.md", "broken");
    let pending = PathListFile::new(world.state.pending_file("notes"));
    let mut entries = vec![
        good.to_string_lossy().to_string(),
        bad.to_string_lossy().to_string(),
    ];
    entries.sort();
    pending.rewrite(&entries).unwrap();

    let engine = RecordingEngine::new(&world.db_path);
    engine.fail_for(&bad.to_string_lossy());

    let parts = build_daemon(
        &world,
        "notes",
        engine.clone(),
        SettableProbe::idle(),
        fast_tuning(),
    );
    drop(parts.shutdown_tx);
    let stats = parts.daemon.run_batch_once(BatchPlan::Use).await.unwrap();

    assert_eq!(stats.ingested, 1);
    assert_eq!(stats.errors, 1);
    assert!(stats.last_error.is_some());

    let alerts = AlertCenter::new(world.state.alerts_file());
    let listed = alerts.store().list(&Default::default());
    assert!(
        listed.iter().any(|a| a.message.contains("bad.md")),
        "an ingestion_failed alert names the file"
    );
}
