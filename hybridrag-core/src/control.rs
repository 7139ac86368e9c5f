//! Pause/resume signalling between operator tools and a running watcher.
//!
//! File-based: a `<db>.pause` file under `watcher_control/` asks the
//! watcher to idle; the watcher answers with `<db>.pause_ack` and resumes
//! when the pause file disappears. Used while migrations or other jobs need
//! exclusive access to a database without stopping the daemon.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::Result;
use crate::state::StateRoot;

const ACK_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PauseControl {
    state: StateRoot,
    database: String,
}

impl PauseControl {
    pub fn new(state: StateRoot, database: &str) -> Self {
        Self {
            state,
            database: database.to_string(),
        }
    }

    fn pause_file(&self) -> std::path::PathBuf {
        self.state.control_file(&self.database, "pause")
    }

    fn ack_file(&self) -> std::path::PathBuf {
        self.state.control_file(&self.database, "pause_ack")
    }

    /// Operator side: ask the watcher to pause and wait for the ack.
    /// Returns false on ack timeout (the pause file stays in place; the
    /// watcher will still see it eventually).
    pub async fn request_pause(&self, timeout: Duration) -> Result<bool> {
        let pause = self.pause_file();
        if let Some(parent) = pause.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(self.ack_file());
        std::fs::write(&pause, b"pause_requested")?;
        info!("Pause signal sent to watcher for {}", self.database);

        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.ack_file().exists() {
                return Ok(true);
            }
            sleep(ACK_POLL).await;
        }
        warn!(
            "Timeout waiting for watcher to acknowledge pause for {}",
            self.database
        );
        Ok(false)
    }

    /// Operator side: lift the pause.
    pub fn resume(&self) -> Result<()> {
        let _ = std::fs::remove_file(self.pause_file());
        let _ = std::fs::remove_file(self.ack_file());
        Ok(())
    }

    /// Watcher side: whether a pause has been requested.
    pub fn pause_requested(&self) -> bool {
        self.pause_file().exists()
    }

    /// Watcher side: acknowledge the pause request.
    pub fn acknowledge(&self) -> Result<()> {
        let ack = self.ack_file();
        if let Some(parent) = ack.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(ack, b"paused")?;
        Ok(())
    }

    /// Watcher side: drop the ack after resuming.
    pub fn clear_ack(&self) {
        let _ = std::fs::remove_file(self.ack_file());
    }
}
