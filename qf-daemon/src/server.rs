//! Read-only HTTP status server
//!
//! - `GET /status` - the latest snapshot, 503 until the first tick completes
//! - `GET /history` - every retained snapshot, oldest first
//! - `GET /health` - liveness and tick count

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use qf_core::{History, StatusHandle};
use qf_protocol::{HealthResponse, HistoryResponse, StatusSnapshot};
use tracing::info;

use crate::fan_control::ShutdownSignal;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct ServerState {
    status: StatusHandle,
    history: Option<History>,
    started: Instant,
}

impl ServerState {
    pub fn new(status: StatusHandle, history: Option<History>) -> Self {
        Self {
            status,
            history,
            started: Instant::now(),
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/history", get(history_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve until shutdown is requested
pub async fn run_server(addr: SocketAddr, state: ServerState, shutdown: Arc<ShutdownSignal>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status server to {}", addr))?;

    info!("Status server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("Status server error")?;

    info!("Status server stopped");
    Ok(())
}

async fn status_handler(State(state): State<ServerState>) -> Response {
    match state.status.latest() {
        Some(snapshot) => Json(StatusSnapshot::clone(&snapshot)).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "no status published yet" })),
        )
            .into_response(),
    }
}

async fn history_handler(State(state): State<ServerState>) -> Json<HistoryResponse> {
    let response = match &state.history {
        Some(history) => HistoryResponse {
            capacity: history.capacity(),
            snapshots: history.snapshots().iter().map(|s| StatusSnapshot::clone(s)).collect(),
        },
        None => HistoryResponse {
            capacity: 0,
            snapshots: Vec::new(),
        },
    };
    Json(response)
}

async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        ticks: state.status.published(),
    })
}
