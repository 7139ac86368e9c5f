//! Newline-delimited path list files.
//!
//! The batch queue and the enrichment pending/done lists all share this
//! format: UTF-8, one absolute path per line, LF-terminated. Appends are
//! plain `O_APPEND` writes; a crash mid-append loses at most the final
//! line. Full rewrites (compaction, batch progress) go through
//! write-temp-then-rename so earlier entries can never be corrupted.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil::atomic_write;

/// Handle on one list file. The file may not exist yet; reads of a missing
/// file return an empty list.
#[derive(Debug, Clone)]
pub struct PathListFile {
    path: PathBuf,
}

impl PathListFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// All non-empty lines, in file order. Blank lines and surrounding
    /// whitespace are dropped; a trailing partial line is simply another
    /// line and tolerated.
    pub fn load(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn load_set(&self) -> Result<std::collections::HashSet<String>> {
        Ok(self.load()?.into_iter().collect())
    }

    /// Append one entry. Creates the file and parent directories on first
    /// use.
    pub fn append(&self, entry: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{entry}")?;
        Ok(())
    }

    /// Replace the whole list atomically.
    pub fn rewrite(&self, entries: &[String]) -> Result<()> {
        let mut body = entries.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        atomic_write(&self.path, body.as_bytes())
    }

    /// Delete the list file if present.
    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
