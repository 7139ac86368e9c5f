//! Contract between the ingestion core and the RAG engine.
//!
//! The core never chunks, embeds, or touches vector/KV/graph storage; it
//! drives an engine through this trait. Insertions are idempotent on
//! identical content — the in-process dedup set is an optimization on top
//! of that guarantee, not a correctness requirement.

mod doc_status;
mod http;

pub use doc_status::DocStatusFile;
pub use http::{HttpEngineConfig, HttpRagEngine};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Retrieval mode for queries, passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Local,
    Global,
    Hybrid,
    Naive,
    Mix,
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryMode::Local => "local",
            QueryMode::Global => "global",
            QueryMode::Hybrid => "hybrid",
            QueryMode::Naive => "naive",
            QueryMode::Mix => "mix",
        };
        f.write_str(s)
    }
}

/// Tunables forwarded with a query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
}

/// Result of a query call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub text: String,
    pub execution_time_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Processing state of a document in the engine's doc-status store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocState {
    Pending,
    Processing,
    Done,
    Failed,
}

/// MD5 content fingerprint, hex-encoded. Matches the engine's `doc-<md5>`
/// document keys.
pub fn content_fingerprint(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

/// Named operations the core invokes on a RAG engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RagEngine: Send + Sync {
    /// Full pipeline: chunk, embed, upsert KV, extract entities/relations,
    /// merge graph. Idempotent on identical content.
    async fn insert(&self, content: &str, source_path: &str) -> std::result::Result<(), EngineError>;

    /// Embed-only fast path, skipping entity/graph extraction. Only called
    /// when [`Self::supports_fast_insert`] returns true; callers must queue
    /// the path for later enrichment.
    async fn insert_fast(
        &self,
        content: &str,
        source_path: &str,
    ) -> std::result::Result<(), EngineError> {
        self.insert(content, source_path).await
    }

    /// Whether the engine offers the embed-only fast path.
    fn supports_fast_insert(&self) -> bool {
        false
    }

    /// Read-only retrieval.
    async fn query(
        &self,
        text: &str,
        mode: QueryMode,
        params: &QueryParams,
    ) -> std::result::Result<QueryOutcome, EngineError>;

    /// Number of documents currently tracked by the engine.
    async fn document_count(&self) -> std::result::Result<u64, EngineError>;

    /// Processing state for a content fingerprint, if known.
    async fn doc_status(
        &self,
        fingerprint: &str,
    ) -> std::result::Result<Option<DocState>, EngineError>;

    /// Release engine resources.
    async fn close(&self) -> std::result::Result<(), EngineError>;
}

/// Seed a dedup set from the engine's on-disk doc-status store. Returns the
/// number of fingerprints loaded; absent or unreadable stores seed nothing.
pub fn seed_fingerprints(
    db_path: &std::path::Path,
    dedup: &mut crate::bounded::BoundedSet,
) -> Result<usize> {
    let store = DocStatusFile::new(db_path);
    let keys = store.fingerprints()?;
    let count = keys.len();
    dedup.extend(keys);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_matches_md5_hex() {
        assert_eq!(
            content_fingerprint("hello"),
            "5d41402abc4b2a76b9719d911017c592"
        );
    }

    #[test]
    fn query_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&QueryMode::Hybrid).unwrap(), "\"hybrid\"");
    }

    #[tokio::test]
    async fn mocked_engine_reports_doc_state() {
        let mut engine = MockRagEngine::new();
        engine
            .expect_doc_status()
            .returning(|_| Ok(Some(DocState::Done)));
        let state = engine.doc_status("abc").await.unwrap();
        assert_eq!(state, Some(DocState::Done));
    }
}
