//! HTTP adapter for an out-of-process RAG engine.
//!
//! The engine runs as a sidecar service (typically on loopback) exposing
//! JSON endpoints for the contract operations. Transient failures — rate
//! limits, 5xx, timeouts, connection errors — are retried here with
//! exponential backoff and jitter; auth and other 4xx failures surface
//! immediately. The ingestion loop above this layer never retries.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::registry::DatabaseRecord;

use super::{DocState, QueryMode, QueryOutcome, QueryParams, RagEngine};

/// Environment variable naming the engine sidecar base URL.
pub const ENGINE_URL_ENV: &str = "HYBRIDRAG_ENGINE_URL";

const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:9621";
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_ATTEMPTS: u32 = 4;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    pub base_url: String,
    pub database: String,
    pub workspace_path: std::path::PathBuf,
    pub model: Option<String>,
    /// Whether the sidecar offers the embed-only insert endpoint.
    pub fast_insert: bool,
    pub query_timeout: Duration,
}

impl HttpEngineConfig {
    /// Build a configuration for one registered database, reading the
    /// sidecar URL from the environment.
    pub fn for_database(record: &DatabaseRecord) -> Self {
        let base_url = std::env::var(ENGINE_URL_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_ENGINE_URL.to_string());
        Self {
            base_url,
            database: record.name.clone(),
            workspace_path: record.path.clone(),
            model: record.model.clone(),
            fast_insert: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// RAG engine reached over HTTP.
#[derive(Debug)]
pub struct HttpRagEngine {
    config: HttpEngineConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: DocState,
}

impl HttpRagEngine {
    pub fn new(config: HttpEngineConfig) -> Result<Self, EngineError> {
        // No global client timeout: inserts are bounded by the engine, not
        // by this adapter. Queries get a per-request timeout below.
        let client = reqwest::Client::builder()
            .build()
            .map_err(EngineError::Network)?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn classify(status: StatusCode, body: String) -> EngineError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => EngineError::RateLimited,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => EngineError::Timeout,
            s if s.is_server_error() => EngineError::Server(format!("{s}: {body}")),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EngineError::Auth(body),
            s if s.is_client_error() => EngineError::BadRequest(format!("{s}: {body}")),
            s => EngineError::Protocol(format!("unexpected status {s}")),
        }
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let exp = BACKOFF_BASE.saturating_mul(2u32.saturating_pow(attempt));
        let capped = exp.min(BACKOFF_CAP);
        // Full jitter: anywhere between half and the full delay.
        let jitter = rand::rng().random_range(0.5..=1.0);
        capped.mul_f64(jitter)
    }

    /// Run a request, retrying transient failures with backoff + jitter.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, EngineError> {
        let mut attempt = 0;
        loop {
            let error = match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status == StatusCode::NOT_FOUND {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    Self::classify(status, body)
                }
                Err(e) if e.is_timeout() => EngineError::Timeout,
                Err(e) => EngineError::Network(e),
            };

            if error.is_transient() && attempt + 1 < MAX_ATTEMPTS {
                let delay = Self::backoff_delay(attempt);
                warn!(
                    "Engine call failed ({error}), retrying in {:.1}s (attempt {}/{})",
                    delay.as_secs_f64(),
                    attempt + 1,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            } else {
                return Err(error);
            }
        }
    }

    async fn do_insert(
        &self,
        content: &str,
        source_path: &str,
        fast: bool,
    ) -> Result<(), EngineError> {
        let endpoint = if fast { "insert_fast" } else { "insert" };
        let body = json!({
            "database": self.config.database,
            "workspace_path": self.config.workspace_path,
            "model": self.config.model,
            "content": content,
            "source_path": source_path,
        });
        let url = self.url(endpoint);
        debug!("POST {url} ({} bytes)", content.len());
        let response = self
            .send_with_retry(|| self.client.post(&url).json(&body))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::Protocol(format!(
                "engine does not expose /{endpoint}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RagEngine for HttpRagEngine {
    async fn insert(&self, content: &str, source_path: &str) -> Result<(), EngineError> {
        self.do_insert(content, source_path, false).await
    }

    async fn insert_fast(&self, content: &str, source_path: &str) -> Result<(), EngineError> {
        self.do_insert(content, source_path, true).await
    }

    fn supports_fast_insert(&self) -> bool {
        self.config.fast_insert
    }

    async fn query(
        &self,
        text: &str,
        mode: QueryMode,
        params: &QueryParams,
    ) -> Result<QueryOutcome, EngineError> {
        let timeout = params
            .timeout_sec
            .map(Duration::from_secs)
            .unwrap_or(self.config.query_timeout);
        let body = json!({
            "database": self.config.database,
            "workspace_path": self.config.workspace_path,
            "model": self.config.model,
            "text": text,
            "mode": mode,
            "top_k": params.top_k,
        });
        let url = self.url("query");
        let response = self
            .send_with_retry(|| self.client.post(&url).json(&body).timeout(timeout))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::Protocol("engine does not expose /query".into()));
        }
        response
            .json::<QueryOutcome>()
            .await
            .map_err(|e| EngineError::Protocol(format!("bad query response: {e}")))
    }

    async fn document_count(&self) -> Result<u64, EngineError> {
        let url = self.url(&format!("documents/count?database={}", self.config.database));
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        response
            .json::<CountResponse>()
            .await
            .map(|c| c.count)
            .map_err(|e| EngineError::Protocol(format!("bad count response: {e}")))
    }

    async fn doc_status(&self, fingerprint: &str) -> Result<Option<DocState>, EngineError> {
        let url = self.url(&format!(
            "doc_status/{fingerprint}?database={}",
            self.config.database
        ));
        let response = self.send_with_retry(|| self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        response
            .json::<StatusResponse>()
            .await
            .map(|s| Some(s.status))
            .map_err(|e| EngineError::Protocol(format!("bad status response: {e}")))
    }

    async fn close(&self) -> Result<(), EngineError> {
        let url = self.url("close");
        let body = json!({ "database": self.config.database });
        // Best effort: a sidecar that is already gone is fine.
        if let Err(e) = self.client.post(&url).json(&body).send().await {
            debug!("Engine close failed (ignored): {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_separates_transient_from_fatal() {
        let transient = HttpRagEngine::classify(StatusCode::TOO_MANY_REQUESTS, String::new());
        assert!(transient.is_transient());
        let transient = HttpRagEngine::classify(StatusCode::BAD_GATEWAY, "oops".into());
        assert!(transient.is_transient());

        let fatal = HttpRagEngine::classify(StatusCode::UNAUTHORIZED, "no key".into());
        assert!(!fatal.is_transient());
        let fatal = HttpRagEngine::classify(StatusCode::UNPROCESSABLE_ENTITY, "bad".into());
        assert!(!fatal.is_transient());
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        for attempt in 0..10 {
            let delay = HttpRagEngine::backoff_delay(attempt);
            assert!(delay <= BACKOFF_CAP);
            assert!(delay >= BACKOFF_BASE / 2 || attempt == 0);
        }
    }
}
