//! Per-database single-writer exclusion.
//!
//! A database may have at most one active ingestion process (watcher, batch
//! controller, or enrichment worker). The lock is an advisory exclusive
//! flock on `pids/<db>.pid`; the winner writes its PID into the file while
//! holding the lock. The descriptor stays open for the life of the owning
//! process, so a crashed owner releases the lock with its last descriptor
//! and a stale PID file never blocks a restart.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::Result;
use crate::state::StateRoot;

/// Held while a process owns a database. Dropping releases the flock and
/// best-effort removes the PID file.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    database: String,
    pid: u32,
}

impl LockGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!("Failed to unlock PID file for {}: {e}", self.database);
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Could not remove PID file {}: {e}", self.path.display());
        }
    }
}

/// Manages acquisition and inspection of per-database locks under one state
/// root.
#[derive(Debug, Clone)]
pub struct LockManager {
    state: StateRoot,
}

impl LockManager {
    pub fn new(state: StateRoot) -> Self {
        Self { state }
    }

    /// Try to take exclusive ownership of a database.
    ///
    /// Returns `None` when another live process holds the lock. There is no
    /// check-then-write window: the PID is written only after the flock is
    /// held.
    pub fn acquire(&self, database: &str, pid: u32) -> Result<Option<LockGuard>> {
        let path = self.state.pid_file(database);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{pid}")?;
        file.sync_all()?;

        debug!("Acquired lock for '{database}' (pid {pid})");
        Ok(Some(LockGuard {
            file,
            path,
            database: database.to_string(),
            pid,
        }))
    }

    /// Whether a live process owns the database, and which PID.
    ///
    /// A PID file whose process is gone is treated as stale: it is removed
    /// and reported as not running.
    pub fn is_running(&self, database: &str) -> (bool, Option<u32>) {
        let path = self.state.pid_file(database);
        let mut contents = String::new();
        let Ok(mut file) = File::open(&path) else {
            return (false, None);
        };
        if file.read_to_string(&mut contents).is_err() {
            return (false, None);
        }
        let Ok(pid) = contents.trim().parse::<u32>() else {
            return (false, None);
        };

        if process_alive(pid) {
            (true, Some(pid))
        } else {
            debug!("Stale PID file for '{database}' (pid {pid} gone), removing");
            let _ = std::fs::remove_file(&path);
            (false, None)
        }
    }
}

/// Probe liveness with signal 0; no signal is actually delivered.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // EPERM means the process exists but belongs to someone else.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, LockManager) {
        let dir = tempfile::tempdir().unwrap();
        let state = StateRoot::at(dir.path().to_path_buf());
        (dir, LockManager::new(state))
    }

    #[test]
    fn acquire_writes_own_pid() {
        let (_dir, manager) = manager();
        let pid = std::process::id();
        let guard = manager.acquire("db1", pid).unwrap().expect("lock free");
        assert_eq!(guard.pid(), pid);

        let (running, seen) = manager.is_running("db1");
        assert!(running);
        assert_eq!(seen, Some(pid));
    }

    #[test]
    fn release_removes_pid_file() {
        let (dir, manager) = manager();
        let guard = manager.acquire("db1", std::process::id()).unwrap().unwrap();
        drop(guard);

        let (running, _) = manager.is_running("db1");
        assert!(!running);
        assert!(!dir.path().join("pids/db1.pid").exists());
    }

    #[test]
    fn stale_pid_file_is_recovered() {
        let (dir, manager) = manager();
        let pid_path = dir.path().join("pids/db1.pid");
        std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
        // A PID that cannot be a live process.
        std::fs::write(&pid_path, "4194304\n").unwrap();

        let (running, _) = manager.is_running("db1");
        assert!(!running);
        assert!(!pid_path.exists(), "stale file cleaned up");

        assert!(manager.acquire("db1", std::process::id()).unwrap().is_some());
    }

    #[test]
    fn locks_are_independent_per_database() {
        let (_dir, manager) = manager();
        let pid = std::process::id();
        let _a = manager.acquire("db1", pid).unwrap().unwrap();
        assert!(manager.acquire("db2", pid).unwrap().is_some());
    }
}
