//! On-disk layout of the per-user state root.
//!
//! All control-plane state that is not owned by a database's engine lives
//! under a single directory, `~/.hybridrag` by default:
//!
//! ```text
//! registry.yaml                 registry (unless relocated)
//! config_pointer                optional path to an alternate registry
//! pids/<db>.pid                 advisory lock + PID
//! batch/<db>.pending.txt        resumable batch queue
//! enrichment_pending/<db>.txt   enrichment worker input
//! enrichment_done/<db>.txt      enrichment worker cursor
//! alerts.json                   alert store
//! watcher_control/<db>.*        pause/resume signal files
//! logs/watcher_<db>.log         rotating daemon logs
//! ```

use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

/// Environment variable overriding the state root (mainly for tests).
pub const STATE_ROOT_ENV: &str = "HYBRIDRAG_HOME";

/// Resolved location of the state root and its well-known children.
#[derive(Debug, Clone)]
pub struct StateRoot {
    root: PathBuf,
}

impl StateRoot {
    /// Resolve the state root: `$HYBRIDRAG_HOME` if set, else `~/.hybridrag`.
    pub fn resolve() -> Result<Self> {
        if let Ok(dir) = std::env::var(STATE_ROOT_ENV) {
            if !dir.is_empty() {
                return Ok(Self::at(PathBuf::from(dir)));
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| RagError::Config("could not determine home directory".into()))?;
        Ok(Self::at(home.join(".hybridrag")))
    }

    /// Use an explicit directory as the state root.
    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.join("registry.yaml")
    }

    pub fn config_pointer(&self) -> PathBuf {
        self.root.join("config_pointer")
    }

    pub fn pid_file(&self, db: &str) -> PathBuf {
        self.root.join("pids").join(format!("{db}.pid"))
    }

    pub fn pending_file(&self, db: &str) -> PathBuf {
        self.root.join("batch").join(format!("{db}.pending.txt"))
    }

    pub fn enrichment_pending_file(&self, db: &str) -> PathBuf {
        self.root.join("enrichment_pending").join(format!("{db}.txt"))
    }

    pub fn enrichment_done_file(&self, db: &str) -> PathBuf {
        self.root.join("enrichment_done").join(format!("{db}.txt"))
    }

    pub fn alerts_file(&self) -> PathBuf {
        self.root.join("alerts.json")
    }

    pub fn control_file(&self, db: &str, signal: &str) -> PathBuf {
        self.root
            .join("watcher_control")
            .join(format!("{db}.{signal}"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn watcher_log_file(&self, db: &str) -> PathBuf {
        self.log_dir().join(format!("watcher_{db}.log"))
    }

    pub fn enrichment_log_file(&self, db: &str) -> PathBuf {
        self.log_dir().join(format!("enrichment_{db}.log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_paths_live_under_root() {
        let root = StateRoot::at(PathBuf::from("/tmp/hr-test"));
        assert_eq!(root.registry_file(), Path::new("/tmp/hr-test/registry.yaml"));
        assert_eq!(root.pid_file("notes"), Path::new("/tmp/hr-test/pids/notes.pid"));
        assert_eq!(
            root.pending_file("notes"),
            Path::new("/tmp/hr-test/batch/notes.pending.txt")
        );
        assert_eq!(
            root.control_file("notes", "pause"),
            Path::new("/tmp/hr-test/watcher_control/notes.pause")
        );
    }
}
