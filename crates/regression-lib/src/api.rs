//! HTTP API for the regression job
//!
//! - `/healthz`: per-component health, 503 once any component failed
//! - `/readyz`: ready while the pipeline runs, with the latest checkpoint
//! - `/checkpoint`: latest checkpoint and live key count
//! - `/metrics`: Prometheus exposition

use crate::health::{CheckpointProgress, ComponentStatus, HealthRegistry};
use crate::observability::PipelineMetrics;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: PipelineMetrics,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, metrics: PipelineMetrics) -> Self {
        Self {
            health_registry,
            metrics,
        }
    }
}

/// Body of `/checkpoint`
#[derive(Debug, Serialize)]
struct CheckpointStatus {
    /// Keys with a model right now, which may be ahead of the checkpoint
    keys_tracked: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_checkpoint: Option<CheckpointProgress>,
}

/// Degraded components still make progress, so only failures are 503
fn status_code(status: ComponentStatus) -> StatusCode {
    if status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    (status_code(health.status), Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

/// 404 until the job has written or restored a checkpoint
async fn checkpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let last_checkpoint = state.health_registry.last_checkpoint().await;
    let status = if last_checkpoint.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    let body = CheckpointStatus {
        keys_tracked: state.metrics.keys_tracked(),
        last_checkpoint,
    };
    (status, Json(body))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode_text() {
        Ok(buffer) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Router over the shared job state
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/checkpoint", get(checkpoint))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API on all interfaces until the listener fails
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "API server listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}
