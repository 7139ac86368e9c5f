//! The ingestion engine: watcher daemon, batch controller, and enrichment
//! worker, plus the load monitor and pending-list plumbing they share.

mod daemon;
mod enrichment;
mod load;
mod pending;
mod tuning;

pub use daemon::{BatchPlan, EngineFactory, SessionStats, WatcherDaemon, WatcherPhase};
pub use enrichment::{
    queue_status, EnrichmentOptions, EnrichmentStats, EnrichmentWorker, QueueStatus,
};
pub use load::{LoadLevel, LoadMonitor, LoadProbe, LoadSample, SysinfoProbe};
pub use pending::PathListFile;
pub use tuning::{BatchTuning, LoadThresholds};
