//! Shared fixtures for the integration tests: a recording engine that
//! behaves like a JSON-backed RAG engine (including maintaining the
//! doc-status store the core seeds its dedup set from), plus registry and
//! state-root scaffolding.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hybridrag_core::engine::{
    content_fingerprint, DocState, QueryMode, QueryOutcome, QueryParams, RagEngine,
};
use hybridrag_core::error::EngineError;
use hybridrag_core::ingest::EngineFactory;
use hybridrag_core::registry::{DatabaseRecord, DatabaseRegistry};
use hybridrag_core::state::StateRoot;
use tokio::sync::watch;

/// One recorded insert call.
#[derive(Debug, Clone)]
pub struct InsertCall {
    pub source_path: String,
    pub fingerprint: String,
    pub fast: bool,
}

/// Engine double: records every call, fails on demand, and maintains the
/// `kv_store_doc_status.json` file a real JSON-backed engine would own.
pub struct RecordingEngine {
    db_path: PathBuf,
    pub inserts: Mutex<Vec<InsertCall>>,
    pub insert_count: Arc<AtomicUsize>,
    fail_paths: Mutex<HashSet<String>>,
    fast_insert: bool,
    /// Fire this shutdown sender once `insert_count` reaches the trigger.
    shutdown_after: Mutex<Option<(usize, watch::Sender<bool>)>>,
}

impl RecordingEngine {
    pub fn new(db_path: &Path) -> Arc<Self> {
        Arc::new(Self {
            db_path: db_path.to_path_buf(),
            inserts: Mutex::new(Vec::new()),
            insert_count: Arc::new(AtomicUsize::new(0)),
            fail_paths: Mutex::new(HashSet::new()),
            fast_insert: false,
            shutdown_after: Mutex::new(None),
        })
    }

    pub fn with_fast_insert(db_path: &Path) -> Arc<Self> {
        Arc::new(Self {
            db_path: db_path.to_path_buf(),
            inserts: Mutex::new(Vec::new()),
            insert_count: Arc::new(AtomicUsize::new(0)),
            fail_paths: Mutex::new(HashSet::new()),
            fast_insert: true,
            shutdown_after: Mutex::new(None),
        })
    }

    pub fn fail_for(&self, source_path: &str) {
        self.fail_paths
            .lock()
            .unwrap()
            .insert(source_path.to_string());
    }

    pub fn trigger_shutdown_after(&self, inserts: usize, tx: watch::Sender<bool>) {
        *self.shutdown_after.lock().unwrap() = Some((inserts, tx));
    }

    pub fn insert_count(&self) -> usize {
        self.insert_count.load(Ordering::SeqCst)
    }

    pub fn inserted_paths(&self) -> Vec<String> {
        self.inserts
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.source_path.clone())
            .collect()
    }

    fn doc_status_file(&self) -> PathBuf {
        self.db_path.join("kv_store_doc_status.json")
    }

    fn mark_done(&self, fingerprint: &str) {
        let path = self.doc_status_file();
        let mut map: serde_json::Map<String, serde_json::Value> = path
            .exists()
            .then(|| std::fs::read_to_string(&path).ok())
            .flatten()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default();
        map.insert(
            format!("doc-{fingerprint}"),
            serde_json::json!({ "status": "done" }),
        );
        std::fs::create_dir_all(&self.db_path).unwrap();
        std::fs::write(&path, serde_json::to_string_pretty(&map).unwrap()).unwrap();
    }

    fn record(&self, content: &str, source_path: &str, fast: bool) -> Result<(), EngineError> {
        if self.fail_paths.lock().unwrap().contains(source_path) {
            return Err(EngineError::Server("injected failure".to_string()));
        }
        let fingerprint = content_fingerprint(content);
        self.mark_done(&fingerprint);
        self.inserts.lock().unwrap().push(InsertCall {
            source_path: source_path.to_string(),
            fingerprint,
            fast,
        });
        let count = self.insert_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((trigger, tx)) = &*self.shutdown_after.lock().unwrap() {
            if count >= *trigger {
                let _ = tx.send(true);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingEngine")
            .field("inserts", &self.insert_count())
            .finish()
    }
}

#[async_trait]
impl RagEngine for RecordingEngine {
    async fn insert(&self, content: &str, source_path: &str) -> Result<(), EngineError> {
        self.record(content, source_path, false)
    }

    async fn insert_fast(&self, content: &str, source_path: &str) -> Result<(), EngineError> {
        self.record(content, source_path, true)
    }

    fn supports_fast_insert(&self) -> bool {
        self.fast_insert
    }

    async fn query(
        &self,
        text: &str,
        _mode: QueryMode,
        _params: &QueryParams,
    ) -> Result<QueryOutcome, EngineError> {
        Ok(QueryOutcome {
            text: format!("echo: {text}"),
            execution_time_sec: 0.0,
            error: None,
        })
    }

    async fn document_count(&self) -> Result<u64, EngineError> {
        Ok(self.insert_count() as u64)
    }

    async fn doc_status(&self, fingerprint: &str) -> Result<Option<DocState>, EngineError> {
        let inserted = self
            .inserts
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.fingerprint == fingerprint);
        Ok(inserted.then_some(DocState::Done))
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Factory handing the daemon a pre-built engine.
pub fn factory_for(engine: Arc<RecordingEngine>) -> EngineFactory {
    Arc::new(move |_record| Ok(engine.clone() as Arc<dyn RagEngine>))
}

/// A tempdir-backed world: state root, registry, database dir, source dir.
pub struct TestWorld {
    pub dir: tempfile::TempDir,
    pub state: StateRoot,
    pub db_path: PathBuf,
    pub source: PathBuf,
}

impl TestWorld {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = StateRoot::at(dir.path().join("state"));
        let db_path = dir.path().join("db");
        let source = dir.path().join("source");
        std::fs::create_dir_all(&db_path).unwrap();
        std::fs::create_dir_all(&source).unwrap();
        Self {
            dir,
            state,
            db_path,
            source,
        }
    }

    pub fn registry(&self) -> DatabaseRegistry {
        DatabaseRegistry::open_at(&self.state, self.state.registry_file()).unwrap()
    }

    /// Register a watchable markdown database with a 1s interval.
    pub fn register_db(&self, name: &str) -> DatabaseRecord {
        let mut record = DatabaseRecord::new(name, self.db_path.clone()).unwrap();
        record = record.with_source_folder(self.source.clone()).unwrap();
        record.watch_interval_sec = 1;
        self.registry().register(record).unwrap()
    }

    pub fn write_source_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.source.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }
}

/// Poll until `predicate` holds or the timeout elapses.
pub async fn wait_for<F: Fn() -> bool>(predicate: F, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    predicate()
}
