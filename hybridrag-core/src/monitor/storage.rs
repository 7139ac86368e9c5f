//! JSON storage-size checks.
//!
//! JSON-backed databases load their stores fully into memory, so growth is
//! an operational risk. Each ingest cycle scans the database directory and
//! reports files or totals over the configured thresholds. Findings are
//! operator signals only; they never stop ingestion.

use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::monitor::alerts::AlertSeverity;
use crate::registry::SizeThresholds;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub enum StorageFinding {
    LargeFile {
        file_name: String,
        size_mb: u64,
        threshold_mb: u64,
    },
    TotalSize {
        total_mb: u64,
        threshold_mb: u64,
        file_count: usize,
        severity: AlertSeverity,
    },
}

impl StorageFinding {
    pub fn severity(&self) -> AlertSeverity {
        match self {
            StorageFinding::LargeFile { .. } => AlertSeverity::Warning,
            StorageFinding::TotalSize { severity, .. } => *severity,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StorageFinding::LargeFile {
                file_name,
                size_mb,
                threshold_mb,
            } => format!("{file_name} is {size_mb} MiB (threshold {threshold_mb} MiB)"),
            StorageFinding::TotalSize {
                total_mb,
                threshold_mb,
                file_count,
                ..
            } => format!(
                "{file_count} JSON files using {total_mb} MiB (threshold {threshold_mb} MiB)"
            ),
        }
    }
}

/// Scan a database directory's JSON files against the thresholds.
pub fn check_json_storage(db_path: &Path, thresholds: &SizeThresholds) -> Result<Vec<StorageFinding>> {
    let mut findings = Vec::new();
    if !db_path.exists() {
        return Ok(findings);
    }

    let file_threshold = thresholds.file_warn_mb * MIB;
    let total_threshold = thresholds.total_warn_mb * MIB;

    let mut total: u64 = 0;
    let mut file_count = 0usize;
    for entry in std::fs::read_dir(db_path)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Could not read entry in {}: {e}", db_path.display());
                continue;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let size = match entry.metadata() {
            Ok(md) if md.is_file() => md.len(),
            _ => continue,
        };
        file_count += 1;
        total += size;

        if size >= file_threshold {
            findings.push(StorageFinding::LargeFile {
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                size_mb: size / MIB,
                threshold_mb: thresholds.file_warn_mb,
            });
        }
    }

    if total >= total_threshold {
        // Half again over the threshold means the process is at real risk
        // of exhausting memory on the next load.
        let severity = if total >= total_threshold + total_threshold / 2 {
            AlertSeverity::Error
        } else {
            AlertSeverity::Warning
        };
        findings.push(StorageFinding::TotalSize {
            total_mb: total / MIB,
            threshold_mb: thresholds.total_warn_mb,
            file_count,
            severity,
        });
    }

    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds(file_mb: u64, total_mb: u64) -> SizeThresholds {
        SizeThresholds {
            file_warn_mb: file_mb,
            total_warn_mb: total_mb,
            perf_degradation_pct: 50,
        }
    }

    fn write_mib(dir: &Path, name: &str, mib: usize) {
        std::fs::write(dir.join(name), vec![b'x'; mib * MIB as usize]).unwrap();
    }

    #[test]
    fn under_thresholds_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        write_mib(dir.path(), "kv_store_full_docs.json", 1);
        let findings = check_json_storage(dir.path(), &thresholds(2, 10)).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn large_file_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        write_mib(dir.path(), "kv_store_full_docs.json", 3);
        let findings = check_json_storage(dir.path(), &thresholds(2, 100)).unwrap();
        assert_eq!(findings.len(), 1);
        assert!(matches!(findings[0], StorageFinding::LargeFile { .. }));
        assert_eq!(findings[0].severity(), AlertSeverity::Warning);
    }

    #[test]
    fn total_escalates_to_error_at_one_and_a_half_times() {
        let dir = tempfile::tempdir().unwrap();
        write_mib(dir.path(), "a.json", 3);
        write_mib(dir.path(), "b.json", 3);
        // total 6 MiB, threshold 4 MiB -> 1.5x exactly
        let findings = check_json_storage(dir.path(), &thresholds(100, 4)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity(), AlertSeverity::Error);
    }

    #[test]
    fn non_json_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_mib(dir.path(), "graph.graphml", 5);
        let findings = check_json_storage(dir.path(), &thresholds(1, 1)).unwrap();
        assert!(findings.is_empty());
    }
}
