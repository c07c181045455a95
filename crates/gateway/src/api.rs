//! Route handlers.
//!
//! Endpoints:
//!
//! - `GET  /health`      — Liveness and version
//! - `GET  /stats`       — Index size and decision settings
//! - `POST /ask`         — Run a query, get the status report
//! - `POST /ask/stream`  — Run a query, get an SSE stream of workflow events

use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use ragflow_core::{Query, SessionId, WorkflowError};
use ragflow_workflow::StatusReport;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::SharedState;

/// Response header carrying the session a streamed query runs in.
pub const SESSION_HEADER: &str = "x-session-id";

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/ask", post(ask_handler))
        .route("/ask/stream", post(ask_stream_handler))
}

// ── Types ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub query: String,

    /// Continue an existing session; a new one is created when absent
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StatsResponse {
    status: String,
    documents: usize,
    total_chunks: usize,
    embedding_model: String,
    distance_threshold: f32,
    context_top_k: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn parse_query(request: AskRequest) -> Result<Query, ApiError> {
    let session = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .map(SessionId::from)
        .unwrap_or_default();

    Query::new(request.query, session).map_err(|e: WorkflowError| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse { error: e.to_string(), kind: e.kind().to_string() }),
        )
    })
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "ragflow",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats_handler(State(state): State<SharedState>) -> Json<StatsResponse> {
    let stats = state.engine.index_stats().await;
    let config = state.engine.config();

    Json(StatsResponse {
        status: stats.status,
        documents: stats.documents,
        total_chunks: stats.chunks,
        embedding_model: stats.embedding_model,
        distance_threshold: config.distance_threshold,
        context_top_k: config.top_k,
    })
}

/// `POST /ask`: run a query to completion.
///
/// 200 with the report when the workflow completes, 502 with the report
/// when a collaborator failed, 422 for an invalid query. A client that
/// disconnects drops the handler, which cancels the query.
async fn ask_handler(
    State(state): State<SharedState>,
    Json(payload): Json<AskRequest>,
) -> Result<(StatusCode, Json<StatusReport>), ApiError> {
    let query = parse_query(payload)?;
    info!(session = %query.session(), query = %query.preview(), "POST /ask");

    let report = state.engine.ask(&query, CancellationToken::new()).await;
    let status = if report.is_completed() { StatusCode::OK } else { StatusCode::BAD_GATEWAY };
    Ok((status, Json(report)))
}

/// `POST /ask/stream`: run a query, receive workflow events as SSE.
///
/// Each SSE event is named after the workflow event type and carries its
/// JSON. Dropping the connection cancels the query.
async fn ask_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let query = parse_query(payload)?;
    let session = query.session().to_string();
    info!(session = %session, query = %query.preview(), "POST /ask/stream");

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let rx = state.engine.stream(query, cancel);

    let stream = ReceiverStream::new(rx).map(move |event| {
        // The guard lives as long as the response body
        let _guard = &guard;
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().event(event.event_type()).data(data))
    });

    Ok(([(SESSION_HEADER, session)], Sse::new(stream).keep_alive(KeepAlive::default())))
}
