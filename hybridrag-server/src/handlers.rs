//! Handlers for the named tool operations.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use hybridrag_core::engine::{DocStatusFile, QueryMode, QueryParams};
use hybridrag_core::error::RagError;
use hybridrag_core::ingest::queue_status;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::state::ServerState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn fail(status: StatusCode, error: &RagError) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": error.to_string() })))
}

fn status_for(error: &RagError) -> StatusCode {
    match error {
        RagError::NotFound(_) => StatusCode::NOT_FOUND,
        RagError::Config(_) | RagError::InvalidName(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn into_response(error: RagError) -> (StatusCode, Json<Value>) {
    fail(status_for(&error), &error)
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub database: Option<String>,
}

pub async fn database_status(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<StatusRequest>,
) -> ApiResult {
    let record = state
        .resolve_database(request.database.as_deref())
        .map_err(into_response)?;

    let document_count = if record.backend.is_json() {
        DocStatusFile::new(&record.path).document_count().ok()
    } else {
        match state.engine(&record).await {
            Ok(engine) => engine.document_count().await.ok(),
            Err(_) => None,
        }
    };

    let (running, pid) = state.locks().is_running(&record.name);
    let enrichment = queue_status(state.state_root(), &record.name).ok();
    let alerts = state.alerts().store().summary();

    Ok(Json(json!({
        "database": record.name,
        "path": record.path,
        "source_folder": record.source_folder,
        "source_type": record.source_type,
        "document_count": document_count,
        "watcher": { "running": running, "pid": pid },
        "last_sync_at": record.last_sync_at,
        "enrichment_queue": enrichment,
        "alerts": alerts,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HealthRequest {}

pub async fn health_check(
    State(state): State<Arc<ServerState>>,
    Json(_request): Json<HealthRequest>,
) -> ApiResult {
    let registry = state.registry().map_err(into_response)?;
    let records = registry.list();
    let running = records
        .iter()
        .filter(|r| state.locks().is_running(&r.name).0)
        .count();

    Ok(Json(json!({
        "status": "ok",
        "registry_path": registry.registry_path(),
        "databases": records.len(),
        "watchers_running": running,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LogsRequest {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_log_lines")]
    pub lines: usize,
    #[serde(default)]
    pub level: Option<String>,
}

fn default_log_lines() -> usize {
    100
}

pub async fn get_logs(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<LogsRequest>,
) -> ApiResult {
    let record = state
        .resolve_database(request.database.as_deref())
        .map_err(into_response)?;

    let log_file = state.state_root().watcher_log_file(&record.name);
    let text = tokio::fs::read_to_string(&log_file).await.unwrap_or_default();

    let level_needle = request.level.as_ref().map(|l| l.to_uppercase());
    let lines: Vec<&str> = text
        .lines()
        .filter(|line| {
            level_needle
                .as_ref()
                .map_or(true, |needle| line.contains(needle.as_str()))
        })
        .collect();
    let tail: Vec<&str> = lines
        .iter()
        .rev()
        .take(request.lines)
        .rev()
        .copied()
        .collect();

    Ok(Json(json!({
        "database": record.name,
        "log_file": log_file,
        "lines": tail,
    })))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub mode: Option<QueryMode>,
}

async fn run_query(
    state: &ServerState,
    request: &QueryRequest,
    mode: QueryMode,
) -> ApiResult {
    let record = state
        .resolve_database(request.database.as_deref())
        .map_err(into_response)?;
    let engine = state.engine(&record).await.map_err(into_response)?;

    let params = QueryParams {
        top_k: request.top_k,
        timeout_sec: None,
    };
    let outcome = engine
        .query(&request.text, mode, &params)
        .await
        .map_err(|e| into_response(RagError::Engine(e)))?;

    Ok(Json(json!({
        "database": record.name,
        "mode": mode,
        "text": outcome.text,
        "execution_time_sec": outcome.execution_time_sec,
        "error": outcome.error,
    })))
}

pub async fn local_query(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult {
    run_query(&state, &request, QueryMode::Local).await
}

pub async fn global_query(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult {
    run_query(&state, &request, QueryMode::Global).await
}

pub async fn hybrid_query(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult {
    run_query(&state, &request, QueryMode::Hybrid).await
}

pub async fn extract_context(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<QueryRequest>,
) -> ApiResult {
    let mode = request.mode.unwrap_or(QueryMode::Mix);
    run_query(&state, &request, mode).await
}

#[derive(Debug, Deserialize)]
pub struct MultihopRequest {
    pub text: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
}

fn default_max_steps() -> usize {
    3
}

#[derive(Debug, Serialize)]
struct HopTrace {
    step: usize,
    question: String,
    answer: String,
    execution_time_sec: f64,
}

/// Bounded iterative retrieval: each hop folds the previous answer into the
/// next question so later hops can chase entities surfaced earlier.
pub async fn multihop_query(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<MultihopRequest>,
) -> ApiResult {
    let record = state
        .resolve_database(request.database.as_deref())
        .map_err(into_response)?;
    let engine = state.engine(&record).await.map_err(into_response)?;

    let max_steps = request.max_steps.clamp(1, 8);
    let mut steps: Vec<HopTrace> = Vec::new();
    let mut question = request.text.clone();

    for step in 1..=max_steps {
        let outcome = match engine
            .query(&question, QueryMode::Mix, &QueryParams::default())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Multihop step {step} failed: {e}");
                break;
            }
        };
        let answer = outcome.text.clone();
        steps.push(HopTrace {
            step,
            question: question.clone(),
            answer: answer.clone(),
            execution_time_sec: outcome.execution_time_sec,
        });
        if answer.trim().is_empty() {
            break;
        }
        question = format!(
            "{}\n\nGiven what was just found:\n{}\n\nWhat remains unanswered about the original question?",
            request.text, answer
        );
    }

    let answer = steps.last().map(|s| s.answer.clone()).unwrap_or_default();
    Ok(Json(json!({
        "database": record.name,
        "answer": answer,
        "steps": steps,
    })))
}
