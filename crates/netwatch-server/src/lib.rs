//! HTTP ingestion endpoint for netwatch agents.
//!
//! Accepts the batches posted by field agents (`POST /?key=..&loop=..` with a
//! JSON [`MetricSet`] body) and writes them into an [`AnalyticsSink`]. The
//! endpoint never retries a failed insert itself: it answers 500 and lets the
//! agent's retry loop send the batch again.
//!
//! Inserts are not transactional across tables. When a sink fails part way
//! through a batch, the rows it already wrote stay, and the agent's resend
//! writes them a second time. Delivery is therefore at-least-once and readers
//! of the tables should tolerate duplicate rows.

pub mod config;
pub mod sink;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, get},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use netwatch_core::MetricSet;

pub use config::{DEFAULT_MAX_BODY_BYTES, ServerConfig};
pub use sink::{AnalyticsSink, MemorySink, NdjsonSink, SinkError, TableNames};

/// Shared server state.
struct AppState {
    metrics_key: String,
    sink: Arc<dyn AnalyticsSink>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Deserialize)]
struct IngestParams {
    key: Option<String>,
    #[serde(rename = "loop")]
    loop_id: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    accepted_batches: u64,
    rejected_batches: u64,
}

async fn handle_ingest(
    State(state): State<Arc<AppState>>,
    method: Method,
    Query(params): Query<IngestParams>,
    body: Bytes,
) -> Response {
    if params.key.as_deref() != Some(state.metrics_key.as_str()) {
        state.rejected.fetch_add(1, Ordering::Relaxed);
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let loop_id = match params.loop_id {
        Some(l) if !l.is_empty() => l,
        _ => {
            state.rejected.fetch_add(1, Ordering::Relaxed);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "Only POST supported.").into_response();
    }

    let metrics: MetricSet = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(e) => {
            warn!("loop {loop_id}: rejecting undecodable payload: {e}");
            state.rejected.fetch_add(1, Ordering::Relaxed);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let sink = Arc::clone(&state.sink);
    let entries = metrics.len();
    let result = {
        let loop_id = loop_id.clone();
        tokio::task::spawn_blocking(move || sink.insert(&loop_id, &metrics)).await
    };
    match result {
        Ok(Ok(written)) => {
            let n = state.accepted.fetch_add(1, Ordering::Relaxed) + 1;
            info!("loop {loop_id}: batch #{n} accepted, {written}/{entries} rows written");
            StatusCode::OK.into_response()
        }
        Ok(Err(e)) => {
            error!("loop {loop_id}: insert failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!("loop {loop_id}: insert task failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: netwatch_core::VERSION.to_string(),
        accepted_batches: state.accepted.load(Ordering::Relaxed),
        rejected_batches: state.rejected.load(Ordering::Relaxed),
    })
}

/// Build the axum router. Bodies over `max_body_bytes` are answered with 413.
pub fn build_router(
    metrics_key: &str,
    sink: Arc<dyn AnalyticsSink>,
    max_body_bytes: usize,
) -> Router {
    let state = Arc::new(AppState {
        metrics_key: metrics_key.to_string(),
        sink,
        accepted: AtomicU64::new(0),
        rejected: AtomicU64::new(0),
    });

    Router::new()
        .route("/", any(handle_ingest))
        .route("/ingest", any(handle_ingest))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Run the ingestion endpoint until the process is stopped.
pub async fn run_server(config: ServerConfig, sink: Arc<dyn AnalyticsSink>) -> std::io::Result<()> {
    let app = build_router(&config.metrics_key, sink, config.max_body_bytes);
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("ingestion endpoint listening on {addr}");
    axum::serve(listener, app).await
}
