//! Reader for the engine-owned `kv_store_doc_status.json`.
//!
//! JSON-backed engines persist per-document processing state keyed by
//! `doc-<md5>`. The core reads this file in two places: seeding the dedup
//! set at daemon startup, and the enrichment worker's already-done check.
//! The file is engine-owned; the core never writes it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::engine::DocState;
use crate::error::Result;

const DOC_STATUS_FILENAME: &str = "kv_store_doc_status.json";
const DOC_KEY_PREFIX: &str = "doc-";

/// Entries are either a bare status string or an object with a `status`
/// field, depending on engine version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusEntry {
    Tagged { status: String },
    Bare(String),
}

impl StatusEntry {
    fn state(&self) -> Option<DocState> {
        let raw = match self {
            StatusEntry::Tagged { status } => status,
            StatusEntry::Bare(status) => status,
        };
        match raw.to_lowercase().as_str() {
            "pending" => Some(DocState::Pending),
            "processing" => Some(DocState::Processing),
            "done" => Some(DocState::Done),
            "failed" => Some(DocState::Failed),
            _ => None,
        }
    }
}

/// Handle on one database's doc-status file.
#[derive(Debug, Clone)]
pub struct DocStatusFile {
    path: PathBuf,
}

impl DocStatusFile {
    pub fn new(db_path: &Path) -> Self {
        Self {
            path: db_path.join(DOC_STATUS_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, StatusEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str(&text) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(
                    "Could not parse doc-status store {}: {e}",
                    self.path.display()
                );
                Ok(BTreeMap::new())
            }
        }
    }

    /// All content fingerprints present, regardless of state. Keys that do
    /// not carry the `doc-` prefix are ignored.
    pub fn fingerprints(&self) -> Result<Vec<String>> {
        Ok(self
            .load()?
            .into_keys()
            .filter_map(|key| key.strip_prefix(DOC_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    /// Number of tracked documents.
    pub fn document_count(&self) -> Result<u64> {
        Ok(self
            .load()?
            .keys()
            .filter(|key| key.starts_with(DOC_KEY_PREFIX))
            .count() as u64)
    }

    /// Processing state for one fingerprint.
    pub fn state_of(&self, fingerprint: &str) -> Result<Option<DocState>> {
        let key = format!("{DOC_KEY_PREFIX}{fingerprint}");
        Ok(self.load()?.get(&key).and_then(StatusEntry::state))
    }

    /// Whether the full pipeline has completed for this fingerprint.
    pub fn is_done(&self, fingerprint: &str) -> bool {
        matches!(self.state_of(fingerprint), Ok(Some(DocState::Done)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_store(dir: &Path, json: &str) {
        std::fs::write(dir.join(DOC_STATUS_FILENAME), json).unwrap();
    }

    #[test]
    fn reads_both_entry_shapes() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            r#"{
                "doc-aaa": {"status": "done", "chunks": 4},
                "doc-bbb": "processing",
                "other-key": "done"
            }"#,
        );
        let store = DocStatusFile::new(dir.path());
        assert_eq!(store.document_count().unwrap(), 2);
        assert_eq!(store.state_of("aaa").unwrap(), Some(DocState::Done));
        assert_eq!(store.state_of("bbb").unwrap(), Some(DocState::Processing));
        assert!(store.is_done("aaa"));
        assert!(!store.is_done("bbb"));

        let mut fps = store.fingerprints().unwrap();
        fps.sort();
        assert_eq!(fps, vec!["aaa".to_string(), "bbb".to_string()]);
    }

    #[test]
    fn missing_store_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocStatusFile::new(dir.path());
        assert_eq!(store.document_count().unwrap(), 0);
        assert!(store.fingerprints().unwrap().is_empty());
        assert_eq!(store.state_of("aaa").unwrap(), None);
    }

    #[test]
    fn corrupt_store_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), "{not json");
        let store = DocStatusFile::new(dir.path());
        assert_eq!(store.document_count().unwrap(), 0);
    }
}
