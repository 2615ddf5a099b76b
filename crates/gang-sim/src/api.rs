//! HTTP API for run status and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use gang_lib::simulator::{RunPhase, StatusHandle};
use gang_lib::GangMetrics;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub status: StatusHandle,
    pub metrics: GangMetrics,
}

impl AppState {
    pub fn new(status: StatusHandle, metrics: GangMetrics) -> Self {
        Self { status, metrics }
    }
}

/// Run status - returns 200 unless the run aborted
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.status.snapshot().await;

    let status_code = match status.phase {
        RunPhase::Aborted => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (status_code, Json(status))
}

/// Ready once the run has started
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.status.snapshot().await;

    let status_code = match status.phase {
        RunPhase::Running | RunPhase::Finished => StatusCode::OK,
        RunPhase::Idle | RunPhase::Aborted => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(status.phase))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
