//! Enrichment worker flows: done-marking, idempotency guards, retry of
//! failures, and queue compaction.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{factory_for, RecordingEngine, TestWorld};
use hybridrag_core::engine::content_fingerprint;
use hybridrag_core::ingest::{
    queue_status, EnrichmentOptions, EnrichmentWorker, LoadProbe, PathListFile,
};
use hybridrag_core::lock::LockManager;
use tokio::sync::watch;

#[derive(Debug)]
struct IdleProbe;

#[async_trait]
impl LoadProbe for IdleProbe {
    async fn cpu_mem_pct(&self) -> (f32, f32) {
        (5.0, 10.0)
    }
}

fn build_worker(
    world: &TestWorld,
    name: &str,
    engine: Arc<RecordingEngine>,
    options: EnrichmentOptions,
) -> (EnrichmentWorker, watch::Sender<bool>) {
    let record = world.registry().get(name).unwrap();
    let locks = LockManager::new(world.state.clone());
    let guard = locks.acquire(name, std::process::id()).unwrap().unwrap();
    let (tx, rx) = watch::channel(false);
    let worker = EnrichmentWorker::new(
        record,
        &world.state,
        factory_for(engine),
        guard,
        rx,
        options,
    )
    .with_load_probe(Arc::new(IdleProbe));
    (worker, tx)
}

/// Pre-mark a content fingerprint as done in the engine-owned store.
fn mark_done_in_store(world: &TestWorld, content: &str) {
    let path = world.db_path.join("kv_store_doc_status.json");
    let mut map: serde_json::Map<String, serde_json::Value> = path
        .exists()
        .then(|| std::fs::read_to_string(&path).ok())
        .flatten()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();
    map.insert(
        format!("doc-{}", content_fingerprint(content)),
        serde_json::json!({ "status": "done" }),
    );
    std::fs::write(&path, serde_json::to_string(&map).unwrap()).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_marks_every_queued_path_done_or_tombstoned() {
    let world = TestWorld::new();
    world.register_db("notes");

    let gone = world.write_source_file("gone.md", "vanished");
    let done = world.write_source_file("done.md", "already processed");
    let fresh = world.write_source_file("fresh.md", "needs the graph pass");

    mark_done_in_store(&world, "already processed");
    std::fs::remove_file(&gone).unwrap();

    let queue = PathListFile::new(world.state.enrichment_pending_file("notes"));
    for path in [&gone, &done, &fresh] {
        queue.append(&path.to_string_lossy()).unwrap();
    }
    // Duplicate entries collapse into one unit of work.
    queue.append(&fresh.to_string_lossy()).unwrap();

    let engine = RecordingEngine::new(&world.db_path);
    let (worker, _tx) = build_worker(&world, "notes", engine.clone(), EnrichmentOptions::default());
    let stats = worker.run().await.unwrap();

    assert_eq!(stats.enriched, 1);
    assert_eq!(stats.skipped_done, 1);
    assert_eq!(stats.skipped_missing, 1);
    assert_eq!(stats.errors, 0);
    assert_eq!(engine.insert_count(), 1, "only the fresh file hit the engine");

    let done_list = PathListFile::new(world.state.enrichment_done_file("notes"));
    assert_eq!(done_list.load().unwrap().len(), 3);
    assert!(
        queue.load().unwrap().is_empty(),
        "compaction emptied the pending list"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failures_stay_pending_for_the_next_run() {
    let world = TestWorld::new();
    world.register_db("notes");

    let flaky = world.write_source_file("flaky.md", "fails this run");
    let queue = PathListFile::new(world.state.enrichment_pending_file("notes"));
    queue.append(&flaky.to_string_lossy()).unwrap();

    let engine = RecordingEngine::new(&world.db_path);
    engine.fail_for(&flaky.to_string_lossy());
    let (worker, _tx) = build_worker(&world, "notes", engine.clone(), EnrichmentOptions::default());
    let stats = worker.run().await.unwrap();

    assert_eq!(stats.errors, 1);
    assert_eq!(stats.enriched, 0);
    assert_eq!(
        queue.load().unwrap().len(),
        1,
        "the failed path survives compaction and will be retried"
    );

    // Second run with a healthy engine completes it.
    let engine2 = RecordingEngine::new(&world.db_path);
    let (worker, _tx) = build_worker(&world, "notes", engine2.clone(), EnrichmentOptions::default());
    let stats = worker.run().await.unwrap();
    assert_eq!(stats.enriched, 1);
    assert!(queue.load().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn limit_bounds_one_run() {
    let world = TestWorld::new();
    world.register_db("notes");
    let queue = PathListFile::new(world.state.enrichment_pending_file("notes"));
    for i in 0..5 {
        let path = world.write_source_file(&format!("doc{i}.md"), &format!("content {i}"));
        queue.append(&path.to_string_lossy()).unwrap();
    }

    let engine = RecordingEngine::new(&world.db_path);
    let (worker, _tx) = build_worker(
        &world,
        "notes",
        engine.clone(),
        EnrichmentOptions {
            limit: Some(2),
            dry_run: false,
        },
    );
    let stats = worker.run().await.unwrap();

    assert_eq!(stats.enriched, 2);
    assert_eq!(queue.load().unwrap().len(), 3);

    let status = queue_status(&world.state, "notes").unwrap();
    assert_eq!(status.unique_pending, 3);
    assert_eq!(status.done_entries, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_touches_nothing() {
    let world = TestWorld::new();
    world.register_db("notes");
    let queue = PathListFile::new(world.state.enrichment_pending_file("notes"));
    let path = world.write_source_file("doc.md", "content");
    queue.append(&path.to_string_lossy()).unwrap();

    let engine = RecordingEngine::new(&world.db_path);
    let (worker, _tx) = build_worker(
        &world,
        "notes",
        engine.clone(),
        EnrichmentOptions {
            limit: None,
            dry_run: true,
        },
    );
    let stats = worker.run().await.unwrap();

    assert_eq!(stats.enriched, 0);
    assert_eq!(engine.insert_count(), 0);
    assert_eq!(queue.load().unwrap().len(), 1);
    let done = PathListFile::new(world.state.enrichment_done_file("notes"));
    assert!(done.load().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_shares_the_database_lock() {
    let world = TestWorld::new();
    world.register_db("notes");
    let locks = LockManager::new(world.state.clone());

    let engine = RecordingEngine::new(&world.db_path);
    let (_worker, _tx) = build_worker(&world, "notes", engine, EnrichmentOptions::default());

    // While the worker holds the lock, a watcher cannot start.
    assert!(locks
        .acquire("notes", std::process::id())
        .unwrap()
        .is_none());
    tokio::time::sleep(Duration::from_millis(10)).await;
}
