//! Rotating file logging for daemon processes.
//!
//! Each daemon writes a per-database log file rotated by size: when the
//! active file reaches 200 MiB it is shifted to `.1` (existing backups
//! shifting up, at most 5 kept) and a fresh file is started. Backups older
//! than 7 days are pruned at startup. The writer plugs into
//! `tracing-subscriber` alongside the usual stderr layer.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tracing::warn;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

const MAX_LOG_SIZE: u64 = 200 * 1024 * 1024;
const MAX_BACKUPS: u32 = 5;
const PRUNE_AFTER_DAYS: u64 = 7;

#[derive(Debug)]
struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_size: u64,
    backups: u32,
}

impl RotatingFile {
    fn open(path: PathBuf, max_size: u64, backups: u32) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            file,
            written,
            max_size,
            backups,
        })
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut os = self.path.clone().into_os_string();
        os.push(format!(".{index}"));
        PathBuf::from(os)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let _ = std::fs::remove_file(self.backup_path(self.backups));
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                let _ = std::fs::rename(&from, self.backup_path(index + 1));
            }
        }
        std::fs::rename(&self.path, self.backup_path(1))?;
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }

    fn write_all_rotating(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(())
    }
}

/// Cloneable `MakeWriter` over a shared rotating file.
#[derive(Debug, Clone)]
pub struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    pub fn open(path: PathBuf) -> Result<Self> {
        Self::with_limits(path, MAX_LOG_SIZE, MAX_BACKUPS)
    }

    pub fn with_limits(path: PathBuf, max_size: u64, backups: u32) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingFile::open(path, max_size, backups)?)),
        })
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("log writer poisoned");
        inner.write_all_rotating(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("log writer poisoned");
        inner.file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Remove rotated log files older than the cutoff. Returns how many were
/// removed.
pub fn prune_old_logs(log_dir: &Path, days: u64) -> usize {
    let cutoff = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
    let mut removed = 0;
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.contains(".log") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified < cutoff {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not prune old log {}: {e}", path.display()),
            }
        }
    }
    removed
}

/// Install the global subscriber for a daemon process: stderr plus the
/// rotating per-database log file. Call once at startup.
pub fn init_daemon_logging(log_file: PathBuf) -> Result<RotatingWriter> {
    if let Some(dir) = log_file.parent() {
        prune_old_logs(dir, PRUNE_AFTER_DAYS);
    }
    let writer = RotatingWriter::open(log_file)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer.clone()),
        )
        .init();
    Ok(writer)
}
