//! Integration tests for the job API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use regression_lib::{
    api::{create_router, AppState},
    health::{components, CheckpointProgress, HealthRegistry},
    observability::PipelineMetrics,
};
use std::sync::Arc;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }

    let metrics = PipelineMetrics::new();
    let state = Arc::new(AppState::new(health_registry, metrics));
    let router = create_router(state.clone());

    (router, state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    for name in components::ALL {
        assert!(health["components"][name].is_object());
    }
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::SINK, "Slow output")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["sink"]["message"], "Slow output");
}

#[tokio::test]
async fn test_healthz_returns_503_when_checkpoint_failed() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::CHECKPOINTER, "Failed to write checkpoint 3")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_tracks_pipeline_state() {
    let (app, state) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;
    let (status, _) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    state
        .health_registry
        .set_unhealthy(components::SOURCE, "Input closed")
        .await;
    let (status, _) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.inc_messages_received();
    state.metrics.inc_samples_dropped("timestamp");
    state.metrics.observe_checkpoint(0.004, 120);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("regression_job_messages_received_total"));
    assert!(metrics_text.contains("regression_job_samples_dropped_total{reason=\"timestamp\"}"));
    assert!(metrics_text.contains("regression_job_checkpoint_duration_seconds_bucket"));
    assert!(metrics_text.contains("regression_job_checkpoint_source_offset"));
}

#[tokio::test]
async fn test_checkpoint_endpoint_before_first_checkpoint() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/checkpoint").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let checkpoint: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(checkpoint.get("last_checkpoint").is_none());
    assert!(checkpoint["keys_tracked"].is_i64());
}

#[tokio::test]
async fn test_checkpoint_progress_is_reported() {
    let (app, state) = setup_test_app().await;

    state.health_registry.set_ready(true).await;
    state.metrics.set_keys_tracked(5);
    state
        .health_registry
        .record_checkpoint(CheckpointProgress {
            checkpoint_id: 7,
            source_offset: 1200,
            keys_tracked: 4,
            created_at: 1_700_000_000,
        })
        .await;

    let (status, body) = get(app.clone(), "/checkpoint").await;
    assert_eq!(status, StatusCode::OK);
    let checkpoint: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(checkpoint["keys_tracked"], 5);
    assert_eq!(checkpoint["last_checkpoint"]["checkpoint_id"], 7);
    assert_eq!(checkpoint["last_checkpoint"]["source_offset"], 1200);

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["last_checkpoint"]["keys_tracked"], 4);
}
