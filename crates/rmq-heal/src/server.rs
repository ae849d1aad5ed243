//! HTTP endpoint for daemon mode: Prometheus scrape target and liveness.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::remediation::RemediationController;
use crate::reporter::MetricsSink;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

pub struct ServerState {
    pub metrics: Arc<MetricsSink>,
    pub remediation: Option<Arc<RemediationController>>,
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler))
        .route("/remediations", get(remediations_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn remediations_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let history = match &state.remediation {
        Some(controller) => controller.history().await,
        None => Vec::new(),
    };
    Json(history)
}

/// Serve until `cancel` fires
pub async fn serve(
    addr: SocketAddr,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Metrics endpoint listening");
    serve_on(listener, state, cancel).await
}

pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<ServerState>,
    cancel: CancellationToken,
) -> Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
