use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Registry file error: {0}")]
    Registry(#[from] serde_yaml::Error),

    #[error("Invalid database name: {0}")]
    InvalidName(String),

    #[error("Database already registered: {0}")]
    AlreadyExists(String),

    #[error("Database not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another process holds the lock for '{database}' (pid {pid:?})")]
    LockHeld {
        database: String,
        pid: Option<u32>,
    },

    #[error("Source folder does not exist: {0}")]
    MissingSourceFolder(PathBuf),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure classification for calls into the RAG engine.
///
/// Transient failures are retried with backoff inside the engine adapter;
/// everything else is surfaced to the ingestion loop immediately.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Rate limited")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Whether the caller may retry this failure after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited
                | EngineError::Timeout
                | EngineError::Server(_)
                | EngineError::Network(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
