//! Small filesystem helpers shared by the registry, alert store, and
//! pending-list I/O.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// Write `data` to `path` atomically: temp file in the same directory, then
/// rename. A crash mid-write leaves either the old file or the new one,
/// never a truncated mix.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| RagError::Internal(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| RagError::Io(e.error))?;
    Ok(())
}

/// Expand a leading `~` and make the path absolute. The path does not have
/// to exist; no symlink resolution is performed.
pub fn normalize_path(input: &Path) -> Result<PathBuf> {
    let expanded = if let Ok(stripped) = input.strip_prefix("~") {
        let home = dirs::home_dir()
            .ok_or_else(|| RagError::Config("could not determine home directory".into()))?;
        home.join(stripped)
    } else {
        input.to_path_buf()
    };
    Ok(std::path::absolute(&expanded)?)
}
