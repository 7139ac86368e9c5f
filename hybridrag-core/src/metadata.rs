//! Per-database metadata sidecar.
//!
//! `database_metadata.json` lives in the database directory next to the
//! engine's stores and records where content came from and when: tracked
//! source folders and a bounded ingestion history. The dashboard timeline
//! and `db-info` read it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsutil::atomic_write;

const METADATA_FILENAME: &str = "database_metadata.json";
const MAX_HISTORY_ENTRIES: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFolderEntry {
    pub path: PathBuf,
    pub added_at: DateTime<Utc>,
    pub last_ingested: DateTime<Utc>,
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionEntry {
    pub timestamp: DateTime<Utc>,
    pub source_folder: PathBuf,
    pub files_processed: u64,
    pub success: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    version: String,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    source_folders: Vec<SourceFolderEntry>,
    #[serde(default)]
    ingestion_history: Vec<IngestionEntry>,
    #[serde(default)]
    total_files_ingested: u64,
    #[serde(default)]
    description: String,
}

impl Default for MetadataFile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: "1.0".to_string(),
            created_at: now,
            last_updated: now,
            source_folders: Vec::new(),
            ingestion_history: Vec::new(),
            total_files_ingested: 0,
            description: String::new(),
        }
    }
}

/// Read/write access to one database's metadata file.
#[derive(Debug)]
pub struct DatabaseMetadata {
    dir: PathBuf,
    data: MetadataFile,
}

impl DatabaseMetadata {
    pub fn open(database_dir: &Path) -> Result<Self> {
        let file = database_dir.join(METADATA_FILENAME);
        let data = if file.exists() {
            serde_json::from_str(&std::fs::read_to_string(&file)?)?
        } else {
            MetadataFile::default()
        };
        Ok(Self {
            dir: database_dir.to_path_buf(),
            data,
        })
    }

    fn save(&mut self) -> Result<()> {
        self.data.last_updated = Utc::now();
        let bytes = serde_json::to_vec_pretty(&self.data)?;
        atomic_write(&self.dir.join(METADATA_FILENAME), &bytes)
    }

    /// Track a source folder, updating its last-ingested time if already
    /// known.
    pub fn add_source_folder(&mut self, path: &Path, recursive: bool) -> Result<()> {
        let now = Utc::now();
        if let Some(existing) = self
            .data
            .source_folders
            .iter_mut()
            .find(|s| s.path == path)
        {
            existing.last_ingested = now;
            existing.recursive = recursive;
        } else {
            self.data.source_folders.push(SourceFolderEntry {
                path: path.to_path_buf(),
                added_at: now,
                last_ingested: now,
                recursive,
            });
        }
        self.save()
    }

    /// Append an ingestion event to the history.
    pub fn record_ingestion(
        &mut self,
        source_folder: &Path,
        files_processed: u64,
        success: bool,
        notes: &str,
    ) -> Result<()> {
        self.data.ingestion_history.push(IngestionEntry {
            timestamp: Utc::now(),
            source_folder: source_folder.to_path_buf(),
            files_processed,
            success,
            notes: notes.to_string(),
        });
        let len = self.data.ingestion_history.len();
        if len > MAX_HISTORY_ENTRIES {
            self.data.ingestion_history.drain(0..len - MAX_HISTORY_ENTRIES);
        }
        if success {
            self.data.total_files_ingested += files_processed;
        }
        self.save()
    }

    pub fn source_folders(&self) -> &[SourceFolderEntry] {
        &self.data.source_folders
    }

    /// Most recent history entries, newest last.
    pub fn history(&self, limit: usize) -> &[IngestionEntry] {
        let len = self.data.ingestion_history.len();
        &self.data.ingestion_history[len.saturating_sub(limit)..]
    }

    pub fn total_files_ingested(&self) -> u64 {
        self.data.total_files_ingested
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        self.data.description = description.to_string();
        self.save()
    }

    pub fn description(&self) -> &str {
        &self.data.description
    }
}
