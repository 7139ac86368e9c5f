//! # HybridRAG query tool server
//!
//! A thin HTTP/JSON surface exposing the named operations external
//! assistants integrate against. Operations are tiered by expected
//! latency:
//!
//! - instant: `database_status`, `health_check`, `get_logs`
//! - interactive: `local_query`, `extract_context`
//! - slow (run as background tasks): `global_query`, `hybrid_query`
//! - long-running: `multihop_query`
//!
//! Protocol identity and tool-discovery metadata belong to the caller's
//! protocol layer; this server commits only to the operation names and
//! their semantics.

mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::post;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use state::ServerState;

#[derive(Parser, Debug)]
#[command(name = "hybridrag-server")]
#[command(about = "Query tool surface for HybridRAG databases")]
#[command(version)]
struct Args {
    /// Bind host
    #[arg(long, env = "HYBRIDRAG_SERVER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Bind port
    #[arg(short, long, env = "HYBRIDRAG_SERVER_PORT", default_value_t = 8765)]
    port: u16,

    /// Default database for requests that do not name one
    #[arg(long, env = "HYBRIDRAG_DATABASE")]
    database: Option<String>,
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/tools/database_status", post(handlers::database_status))
        .route("/tools/health_check", post(handlers::health_check))
        .route("/tools/get_logs", post(handlers::get_logs))
        .route("/tools/local_query", post(handlers::local_query))
        .route("/tools/global_query", post(handlers::global_query))
        .route("/tools/hybrid_query", post(handlers::hybrid_query))
        .route("/tools/extract_context", post(handlers::extract_context))
        .route("/tools/multihop_query", post(handlers::multihop_query))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let state = Arc::new(ServerState::resolve(args.database.clone())?);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!("hybridrag-server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}
