//! Monitoring and alerting: the alert store with its notification sinks,
//! the rolling performance tracker, and the JSON storage-size checks. The
//! ingestion engine consumes these for self-throttling decisions; the
//! operator surfaces consume them read-only.

mod alerts;
mod perf;
mod storage;

pub use alerts::{
    Alert, AlertCenter, AlertFilter, AlertSeverity, AlertSink, AlertStore, AlertSummary,
    AlertType, DesktopSink, LogSink, WebhookSink,
};
pub use perf::{PerfWarning, PerformanceTracker};
pub use storage::{check_json_storage, StorageFinding};
