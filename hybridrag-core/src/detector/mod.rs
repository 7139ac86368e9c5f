//! Polling change detection for a watched source folder.
//!
//! Each call to [`ChangeDetector::detect_changes`] rescans the folder and
//! diffs against the previous scan, yielding `(new, modified, deleted)`
//! sets. Memory stays bounded by the scan output: modification times for
//! deleted paths are erased on every tick.

mod fs;

pub use fs::{FileSystem, FsMetadata, InMemoryFs, ReadDirStream, RealFs};

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::warn;

use crate::error::Result;

/// Filters applied during a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanFilters {
    pub recursive: bool,
    /// Dotted extensions (e.g. `.md`), compared case-insensitively. `None`
    /// admits every extension.
    pub extensions: Option<BTreeSet<String>>,
    /// Restrict to paths containing a `.specstory` directory segment.
    pub specstory_only: bool,
}

impl ScanFilters {
    fn include(&self, path: &Path) -> bool {
        // Hidden files are excluded; hidden directories are still walked so
        // `.specstory` trees remain reachable.
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') {
                return false;
            }
        }

        if self.specstory_only {
            let in_specstory = path.components().any(|c| match c {
                std::path::Component::Normal(os) => os.to_str() == Some(".specstory"),
                _ => false,
            });
            if !in_specstory {
                return false;
            }
        }

        match &self.extensions {
            None => true,
            Some(extensions) => {
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    return false;
                };
                let dotted = format!(".{}", ext.to_lowercase());
                extensions.iter().any(|e| e.to_lowercase() == dotted)
            }
        }
    }
}

/// Changes observed by one detection tick.
#[derive(Debug, Default, Clone)]
pub struct FileChanges {
    pub new: BTreeSet<PathBuf>,
    pub modified: BTreeSet<PathBuf>,
    pub deleted: BTreeSet<PathBuf>,
}

impl FileChanges {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Paths that need (re)ingestion: new plus modified.
    pub fn to_process(&self) -> Vec<PathBuf> {
        self.new.iter().chain(self.modified.iter()).cloned().collect()
    }
}

/// Tracks the known file set of one source folder across scans.
pub struct ChangeDetector {
    root: PathBuf,
    filters: ScanFilters,
    fs: Arc<dyn FileSystem>,
    /// Known files and their last observed mtime.
    known: HashMap<PathBuf, Option<SystemTime>>,
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("root", &self.root)
            .field("filters", &self.filters)
            .field("known_files", &self.known.len())
            .finish()
    }
}

impl ChangeDetector {
    pub fn new(root: PathBuf, filters: ScanFilters) -> Self {
        Self::with_fs(root, filters, Arc::new(RealFs::new()))
    }

    /// Construct with a custom filesystem (useful for tests).
    pub fn with_fs(root: PathBuf, filters: ScanFilters, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root,
            filters,
            fs,
            known: HashMap::new(),
        }
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Walk the folder and return every matching file with its mtime.
    pub async fn scan_files(&self) -> Result<HashMap<PathBuf, Option<SystemTime>>> {
        let mut files = HashMap::new();
        if !self.fs.path_exists(&self.root).await {
            warn!("Source folder does not exist: {}", self.root.display());
            return Ok(files);
        }

        let mut dirs = vec![self.root.clone()];
        while let Some(dir) = dirs.pop() {
            let mut entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to read directory {}: {e}", dir.display());
                    continue;
                }
            };
            loop {
                let next = match entries.next_entry().await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Failed to read entry under {}: {e}", dir.display());
                        break;
                    }
                };
                let Some(path) = next else { break };
                let metadata = match self.fs.metadata(&path).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        warn!("Failed to stat {}: {e}", path.display());
                        continue;
                    }
                };
                if metadata.is_dir {
                    if self.filters.recursive {
                        dirs.push(path);
                    }
                } else if metadata.is_file && self.filters.include(&path) {
                    files.insert(path, metadata.modified);
                }
            }
        }
        Ok(files)
    }

    /// Scan once and adopt the result as the known set without reporting
    /// anything as changed. Used when entering watch mode.
    pub async fn baseline(&mut self) -> Result<usize> {
        self.known = self.scan_files().await?;
        Ok(self.known.len())
    }

    /// Diff the current folder contents against the previous scan.
    ///
    /// The first call reports everything as new (unless [`Self::baseline`]
    /// ran first). No ordering is guaranteed within the returned sets.
    pub async fn detect_changes(&mut self) -> Result<FileChanges> {
        let current = self.scan_files().await?;
        let mut changes = FileChanges::default();

        for (path, mtime) in &current {
            match self.known.get(path) {
                None => {
                    changes.new.insert(path.clone());
                }
                Some(previous) => {
                    let newer = match (mtime, previous) {
                        (Some(now), Some(then)) => now > then,
                        (Some(_), None) => true,
                        _ => false,
                    };
                    if newer {
                        changes.modified.insert(path.clone());
                    }
                }
            }
        }

        for path in self.known.keys() {
            if !current.contains_key(path) {
                changes.deleted.insert(path.clone());
            }
        }

        // Replacing the map drops mtime entries for deleted paths.
        self.known = current;
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixture() -> (InMemoryFs, SystemTime) {
        let mut fs = InMemoryFs::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        fs.add_dir("/src");
        fs.add_file_at("/src/a.md", 10, t0);
        fs.add_file_at("/src/b.md", 20, t0);
        fs.add_file_at("/src/skip.txt", 5, t0);
        fs.add_dir("/src/sub");
        fs.add_file_at("/src/sub/c.md", 30, t0);
        (fs, t0)
    }

    fn md_filters(recursive: bool) -> ScanFilters {
        ScanFilters {
            recursive,
            extensions: Some(BTreeSet::from([".md".to_string()])),
            specstory_only: false,
        }
    }

    #[tokio::test]
    async fn first_scan_reports_everything_as_new() {
        let (fs, _) = fixture();
        let mut detector =
            ChangeDetector::with_fs(PathBuf::from("/src"), md_filters(true), Arc::new(fs));
        let changes = detector.detect_changes().await.unwrap();
        assert_eq!(changes.new.len(), 3);
        assert!(changes.modified.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[tokio::test]
    async fn non_recursive_scan_skips_subdirectories() {
        let (fs, _) = fixture();
        let mut detector =
            ChangeDetector::with_fs(PathBuf::from("/src"), md_filters(false), Arc::new(fs));
        let changes = detector.detect_changes().await.unwrap();
        assert_eq!(changes.new.len(), 2);
        assert!(!changes.new.contains(Path::new("/src/sub/c.md")));
    }

    #[tokio::test]
    async fn baseline_then_quiet_tick_reports_nothing() {
        let (fs, _) = fixture();
        let mut detector =
            ChangeDetector::with_fs(PathBuf::from("/src"), md_filters(true), Arc::new(fs));
        assert_eq!(detector.baseline().await.unwrap(), 3);
        let changes = detector.detect_changes().await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn detects_new_modified_and_deleted() {
        let (fs, t0) = fixture();
        let mut detector = ChangeDetector::with_fs(
            PathBuf::from("/src"),
            md_filters(true),
            Arc::new(fs.clone()),
        );
        detector.baseline().await.unwrap();

        let mut next = fs;
        next.add_file_at("/src/new.md", 1, t0);
        next.touch("/src/a.md", t0 + Duration::from_secs(60));
        next.remove("/src/b.md");
        detector.fs = Arc::new(next);

        let changes = detector.detect_changes().await.unwrap();
        assert_eq!(changes.new, BTreeSet::from([PathBuf::from("/src/new.md")]));
        assert_eq!(
            changes.modified,
            BTreeSet::from([PathBuf::from("/src/a.md")])
        );
        assert_eq!(changes.deleted, BTreeSet::from([PathBuf::from("/src/b.md")]));
        // Deleted entries leave the known set so mtimes cannot accumulate.
        assert_eq!(detector.known_count(), 3);
    }

    #[tokio::test]
    async fn extension_filter_is_case_insensitive() {
        let mut fs = InMemoryFs::new();
        fs.add_dir("/src");
        fs.add_file("/src/READ.MD", 1);
        fs.add_file("/src/notes.Md", 1);
        let mut detector =
            ChangeDetector::with_fs(PathBuf::from("/src"), md_filters(true), Arc::new(fs));
        let changes = detector.detect_changes().await.unwrap();
        assert_eq!(changes.new.len(), 2);
    }

    #[tokio::test]
    async fn hidden_files_are_excluded_but_specstory_dirs_are_walked() {
        let mut fs = InMemoryFs::new();
        fs.add_dir("/src");
        fs.add_file("/src/.hidden.md", 1);
        fs.add_dir("/src/.specstory");
        fs.add_dir("/src/.specstory/history");
        fs.add_file("/src/.specstory/history/conv.md", 1);
        fs.add_file("/src/plain.md", 1);

        let filters = ScanFilters {
            recursive: true,
            extensions: Some(BTreeSet::from([".md".to_string()])),
            specstory_only: true,
        };
        let mut detector =
            ChangeDetector::with_fs(PathBuf::from("/src"), filters, Arc::new(fs));
        let changes = detector.detect_changes().await.unwrap();
        assert_eq!(
            changes.new,
            BTreeSet::from([PathBuf::from("/src/.specstory/history/conv.md")])
        );
    }
}
