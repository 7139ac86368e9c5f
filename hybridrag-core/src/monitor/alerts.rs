//! Alert store and notification fan-out.
//!
//! Alerts are persisted to a single JSON file capped at 1,000 entries
//! (oldest evicted). IDs are deterministic from type, timestamp second,
//! and a hash of the message, so re-emitting the same alert in the same
//! second is idempotent for consumers. Notification sinks are best-effort:
//! a failing sink never propagates into the ingestion loop.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::fsutil::atomic_write;

const MAX_ALERTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    IngestionFailed,
    IngestionPartial,
    WatcherStopped,
    WatcherError,
    DatabaseError,
    ConfigError,
    SystemError,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertType::IngestionFailed => "ingestion_failed",
            AlertType::IngestionPartial => "ingestion_partial",
            AlertType::WatcherStopped => "watcher_stopped",
            AlertType::WatcherError => "watcher_error",
            AlertType::DatabaseError => "database_error",
            AlertType::ConfigError => "config_error",
            AlertType::SystemError => "system_error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub database: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        database: impl Into<String>,
        details: Value,
    ) -> Self {
        let message = message.into();
        let timestamp = Utc::now();
        let id = Self::deterministic_id(alert_type, timestamp, &message);
        Self {
            id,
            alert_type,
            severity,
            message,
            database: database.into(),
            timestamp,
            details,
            acknowledged: false,
        }
    }

    fn deterministic_id(alert_type: AlertType, timestamp: DateTime<Utc>, message: &str) -> String {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        format!(
            "{}-{}-{:04}",
            alert_type,
            timestamp.format("%Y%m%d%H%M%S"),
            hasher.finish() % 10000
        )
    }
}

/// Filter for [`AlertStore::list`].
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub database: Option<String>,
    pub severity: Option<AlertSeverity>,
    pub include_acked: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AlertSummary {
    pub critical: usize,
    pub error: usize,
    pub warning: usize,
    pub info: usize,
    pub total: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AlertsFile {
    alerts: Vec<Alert>,
}

/// Persistent, capacity-bounded alert log. Thread-safe within a process;
/// cross-process writers rely on atomic rewrite and may interleave.
#[derive(Debug)]
pub struct AlertStore {
    path: PathBuf,
    inner: Mutex<Vec<Alert>>,
}

impl AlertStore {
    pub fn open(path: PathBuf) -> Self {
        let alerts = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<AlertsFile>(&text) {
                Ok(file) => file.alerts,
                Err(e) => {
                    warn!("Could not parse alerts file {}: {e}", path.display());
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            inner: Mutex::new(alerts),
        }
    }

    fn save(&self, alerts: &[Alert]) {
        let file = AlertsFile {
            alerts: alerts.to_vec(),
        };
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(e) = atomic_write(&self.path, &bytes) {
                    error!("Could not save alerts: {e}");
                }
            }
            Err(e) => error!("Could not serialize alerts: {e}"),
        }
    }

    pub fn add(&self, alert: Alert) {
        let mut alerts = self.inner.lock().expect("alert store poisoned");
        alerts.push(alert);
        let len = alerts.len();
        if len > MAX_ALERTS {
            alerts.drain(0..len - MAX_ALERTS);
        }
        self.save(&alerts);
    }

    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let alerts = self.inner.lock().expect("alert store poisoned");
        alerts
            .iter()
            .filter(|a| filter.include_acked || !a.acknowledged)
            .filter(|a| filter.database.as_deref().map_or(true, |db| a.database == db))
            .filter(|a| filter.severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect()
    }

    pub fn acknowledge(&self, id: &str) -> bool {
        let mut alerts = self.inner.lock().expect("alert store poisoned");
        let mut found = false;
        for alert in alerts.iter_mut() {
            if alert.id == id {
                alert.acknowledged = true;
                found = true;
            }
        }
        if found {
            self.save(&alerts);
        }
        found
    }

    pub fn acknowledge_all(&self, database: Option<&str>) {
        let mut alerts = self.inner.lock().expect("alert store poisoned");
        for alert in alerts.iter_mut() {
            if database.map_or(true, |db| alert.database == db) {
                alert.acknowledged = true;
            }
        }
        self.save(&alerts);
    }

    pub fn clear_older_than(&self, days: i64) -> usize {
        let cutoff = Utc::now() - Duration::days(days);
        let mut alerts = self.inner.lock().expect("alert store poisoned");
        let before = alerts.len();
        alerts.retain(|a| a.timestamp > cutoff);
        let removed = before - alerts.len();
        if removed > 0 {
            self.save(&alerts);
        }
        removed
    }

    /// Summary of unacknowledged alerts by severity.
    pub fn summary(&self) -> AlertSummary {
        let alerts = self.inner.lock().expect("alert store poisoned");
        let mut summary = AlertSummary::default();
        for alert in alerts.iter().filter(|a| !a.acknowledged) {
            match alert.severity {
                AlertSeverity::Critical => summary.critical += 1,
                AlertSeverity::Error => summary.error += 1,
                AlertSeverity::Warning => summary.warning += 1,
                AlertSeverity::Info => summary.info += 1,
            }
            summary.total += 1;
        }
        summary
    }
}

/// A notification channel. Sinks must swallow their own failures.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert);
}

/// Default sink: route the alert into the process log at the matching
/// level.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, alert: &Alert) {
        let line = format!("[ALERT] [{}] {}", alert.database, alert.message);
        match alert.severity {
            AlertSeverity::Info => info!("{line}"),
            AlertSeverity::Warning => warn!("{line}"),
            AlertSeverity::Error | AlertSeverity::Critical => error!("{line}"),
        }
    }
}

/// Desktop notifications via notify-send (Linux) or osascript (macOS).
/// Entirely best-effort.
#[derive(Debug, Default)]
pub struct DesktopSink;

#[async_trait::async_trait]
impl AlertSink for DesktopSink {
    async fn deliver(&self, alert: &Alert) {
        let title = format!("HybridRAG {}", alert.severity.to_string().to_uppercase());
        let message = format!("[{}] {}", alert.database, alert.message);

        let command = if std::path::Path::new("/usr/bin/notify-send").exists() {
            let urgency = match alert.severity {
                AlertSeverity::Info => "low",
                AlertSeverity::Warning => "normal",
                AlertSeverity::Error | AlertSeverity::Critical => "critical",
            };
            let mut cmd = tokio::process::Command::new("notify-send");
            cmd.args(["-u", urgency, &title, &message]);
            Some(cmd)
        } else if std::path::Path::new("/usr/bin/osascript").exists() {
            let script = format!("display notification \"{message}\" with title \"{title}\"");
            let mut cmd = tokio::process::Command::new("osascript");
            cmd.args(["-e", &script]);
            Some(cmd)
        } else {
            None
        };

        if let Some(mut cmd) = command {
            if let Err(e) = cmd.output().await {
                debug!("Desktop notification failed: {e}");
            }
        }
    }
}

/// POST the alert as JSON to a webhook endpoint. Best-effort.
#[derive(Debug)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, alert: &Alert) {
        if let Err(e) = self.client.post(&self.url).json(alert).send().await {
            debug!("Webhook notification failed: {e}");
        }
    }
}

/// Store plus notification fan-out; the single alerting entry point handed
/// to the daemon and workers.
pub struct AlertCenter {
    store: AlertStore,
    sinks: Vec<Box<dyn AlertSink>>,
}

impl std::fmt::Debug for AlertCenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertCenter")
            .field("store", &self.store)
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

impl AlertCenter {
    pub fn new(alerts_file: PathBuf) -> Self {
        Self {
            store: AlertStore::open(alerts_file),
            sinks: vec![Box::new(LogSink)],
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    async fn emit(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        database: &str,
        details: Value,
    ) -> Alert {
        let alert = Alert::new(alert_type, severity, message, database, details);
        self.store.add(alert.clone());
        for sink in &self.sinks {
            sink.deliver(&alert).await;
        }
        alert
    }

    pub async fn ingestion_failed(&self, database: &str, file_name: &str, error: &str) -> Alert {
        self.emit(
            AlertType::IngestionFailed,
            AlertSeverity::Error,
            format!("Failed to ingest '{file_name}': {error}"),
            database,
            serde_json::json!({ "file_name": file_name, "error": error }),
        )
        .await
    }

    pub async fn ingestion_partial(&self, database: &str, total: usize, failed: usize) -> Alert {
        let severity = if failed * 2 < total {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Error
        };
        self.emit(
            AlertType::IngestionPartial,
            severity,
            format!("Ingestion completed with errors: {failed}/{total} files failed"),
            database,
            serde_json::json!({ "total": total, "failed": failed }),
        )
        .await
    }

    pub async fn watcher_stopped(&self, database: &str, reason: &str, details: Value) -> Alert {
        self.emit(
            AlertType::WatcherStopped,
            AlertSeverity::Critical,
            format!("Watcher stopped: {reason}"),
            database,
            details,
        )
        .await
    }

    pub async fn watcher_error(
        &self,
        database: &str,
        severity: AlertSeverity,
        error: &str,
        details: Value,
    ) -> Alert {
        self.emit(
            AlertType::WatcherError,
            severity,
            format!("Watcher error: {error}"),
            database,
            details,
        )
        .await
    }

    pub async fn info(&self, database: &str, message: &str, details: Value) -> Alert {
        self.emit(
            AlertType::SystemError,
            AlertSeverity::Info,
            message.to_string(),
            database,
            details,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, AlertStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AlertStore::open(dir.path().join("alerts.json"));
        (dir, store)
    }

    fn alert(db: &str, severity: AlertSeverity, message: &str) -> Alert {
        Alert::new(
            AlertType::WatcherError,
            severity,
            message,
            db,
            Value::Null,
        )
    }

    #[test]
    fn cap_evicts_oldest() {
        let (_dir, store) = store();
        for i in 0..1001 {
            store.add(alert("db", AlertSeverity::Info, &format!("alert {i}")));
        }
        let all = store.list(&AlertFilter {
            include_acked: true,
            ..Default::default()
        });
        assert_eq!(all.len(), 1000);
        assert_eq!(all[0].message, "alert 1", "oldest entry was evicted");
    }

    #[test]
    fn acknowledge_hides_from_default_listing() {
        let (_dir, store) = store();
        store.add(alert("db", AlertSeverity::Error, "boom"));
        let id = store.list(&AlertFilter::default())[0].id.clone();

        assert!(store.acknowledge(&id));
        assert!(store.list(&AlertFilter::default()).is_empty());
        assert_eq!(
            store
                .list(&AlertFilter {
                    include_acked: true,
                    ..Default::default()
                })
                .len(),
            1
        );
    }

    #[test]
    fn filters_by_database_and_severity() {
        let (_dir, store) = store();
        store.add(alert("one", AlertSeverity::Error, "a"));
        store.add(alert("two", AlertSeverity::Warning, "b"));

        let by_db = store.list(&AlertFilter {
            database: Some("one".into()),
            ..Default::default()
        });
        assert_eq!(by_db.len(), 1);

        let by_sev = store.list(&AlertFilter {
            severity: Some(AlertSeverity::Warning),
            ..Default::default()
        });
        assert_eq!(by_sev.len(), 1);
        assert_eq!(by_sev[0].database, "two");
    }

    #[test]
    fn summary_counts_unacknowledged_by_severity() {
        let (_dir, store) = store();
        store.add(alert("db", AlertSeverity::Critical, "c"));
        store.add(alert("db", AlertSeverity::Error, "e"));
        store.add(alert("db", AlertSeverity::Warning, "w"));
        store.add(alert("db", AlertSeverity::Info, "i"));
        store.acknowledge_all(None);
        store.add(alert("db", AlertSeverity::Error, "fresh"));

        let summary = store.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.critical, 0);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        {
            let store = AlertStore::open(path.clone());
            store.add(alert("db", AlertSeverity::Error, "kept"));
        }
        let store = AlertStore::open(path);
        assert_eq!(store.list(&AlertFilter::default()).len(), 1);
    }

    #[test]
    fn id_embeds_type_and_second() {
        let a = alert("db", AlertSeverity::Error, "msg");
        assert!(a.id.starts_with("watcher_error-"));
        // type-YYYYmmddHHMMSS-hash
        assert_eq!(a.id.split('-').count(), 3);
    }
}
