//! HTTP API gateway for RAGFlow.
//!
//! Exposes the workflow engine over HTTP: health and index statistics, a
//! one-shot `POST /ask` that returns the full status report, and
//! `POST /ask/stream` that streams workflow events as SSE.
//!
//! Built on Axum for high performance async HTTP.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use ragflow_config::AppConfig;
use ragflow_workflow::WorkflowEngine;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub engine: Arc<WorkflowEngine>,
    pub config: AppConfig,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - CORS from `gateway.cors_origins` (any origin when empty)
/// - Request body size limit (64 KiB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);

    api::routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

/// Start the gateway HTTP server and run until Ctrl+C.
pub async fn start(config: AppConfig, engine: Arc<WorkflowEngine>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let app = build_router(Arc::new(GatewayState { engine, config }));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
