//! # HybridRAG Core
//!
//! The ingestion control plane for multi-database RAG knowledge stores:
//! a registry of databases, per-database single-writer locking, polling
//! change detection, the watcher/batch/enrichment scheduler, and the
//! monitoring that feeds both operator surfaces and the scheduler's own
//! throttling decisions.
//!
//! The RAG engine itself (chunking, embedding, storage) is external; this
//! crate drives it through the [`engine::RagEngine`] contract.

pub mod bounded;
pub mod control;
pub mod detector;
pub mod engine;
pub mod error;
pub mod fsutil;
pub mod ingest;
pub mod lock;
pub mod logging;
pub mod metadata;
pub mod monitor;
pub mod registry;
pub mod state;

pub use bounded::BoundedSet;
pub use control::PauseControl;
pub use detector::{ChangeDetector, FileChanges, ScanFilters};
pub use engine::{content_fingerprint, DocStatusFile, QueryMode, QueryParams, RagEngine};
pub use error::{EngineError, RagError, Result};
pub use ingest::{
    BatchTuning, EnrichmentOptions, EnrichmentWorker, SessionStats, WatcherDaemon,
};
pub use lock::{LockGuard, LockManager};
pub use metadata::DatabaseMetadata;
pub use monitor::{Alert, AlertCenter, AlertSeverity, AlertStore, AlertType};
pub use registry::{DatabaseRecord, DatabaseRegistry, SourceType};
pub use state::StateRoot;
