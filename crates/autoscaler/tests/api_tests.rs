//! Integration tests for the autoscaler API endpoints

use autoscaler_lib::{
    controller::{InstanceReport, StatusBoard, TickOutcome, TickReport},
    health::{components, HealthRegistry},
    observability::AutoscalerMetrics,
    scaling::{ScaleAction, ScalingDecision},
    DeploymentTopology, ScalingPolicy,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use replica_autoscaler::api::{create_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let state = Arc::new(AppState {
        health_registry,
        metrics: AutoscalerMetrics::new(),
        status: StatusBoard::new(),
        topology: DeploymentTopology::default(),
        policy: ScalingPolicy::new(Duration::from_secs(30), 80.0, 75.5).unwrap(),
    });
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
    assert!(health["components"]["inspector"].is_object());
    assert!(health["components"]["engine"].is_object());
    assert!(health["components"]["reconciler"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_degraded(components::RECONCILER, "server 'web_2:80' is not in the upstream pool")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["components"]["reconciler"]["consecutive_failures"], 1);
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::INSPECTOR, "container runtime unavailable")
        .await;

    let (status, body) = get(app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_startup_checks() {
    let (app, state) = setup_test_app().await;

    let (status, body) = get(app.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    state.health_registry.set_ready(true).await;

    let (status, body) = get(app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let readiness: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.observe_tick_duration(0.3);
    state.metrics.set_replicas(3, 5);
    state.metrics.inc_scale_event(ScaleAction::ScaleUp);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("autoscaler_tick_duration_seconds_bucket"));
    assert!(metrics_text.contains("autoscaler_running_replicas"));
    assert!(metrics_text.contains("autoscaler_desired_replicas"));
    assert!(metrics_text.contains("autoscaler_scale_events_total{direction=\"scale_up\"}"));
}

#[tokio::test]
async fn test_status_before_first_tick() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = get(app, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);

    let response: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(response["network"], "grs-net");
    assert_eq!(response["period_secs"], 30.0);
    assert_eq!(response["memory_threshold_pct"], 75.5);
    assert!(response["latest"].is_null());
}

#[tokio::test]
async fn test_status_returns_latest_report() {
    let (app, state) = setup_test_app().await;

    state
        .status
        .publish(TickReport {
            tick: 3,
            taken_at: 1_700_000_000,
            running_replicas: 2,
            samples: vec![InstanceReport {
                instance: "web_1".into(),
                cpu_utilization_pct: 91.0,
                memory_utilization_pct: 20.0,
                cpu: "91.000%".into(),
                memory: "20.000%".into(),
            }],
            skipped: vec!["web_2".into()],
            ratios: vec![],
            decision: ScalingDecision {
                action: ScaleAction::ScaleUp,
                running_replicas: 2,
                desired_replicas: 3,
                driver: None,
            },
            outcome: TickOutcome::ScaledUp {
                instances: vec!["web_3".into()],
            },
            duration_ms: 1200,
        })
        .await;

    let (status, body) = get(app, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);

    let response: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let latest = &response["latest"];
    assert_eq!(latest["tick"], 3);
    assert_eq!(latest["decision"]["action"], "scale_up");
    assert_eq!(latest["outcome"]["result"], "scaled_up");
    assert_eq!(latest["outcome"]["instances"][0], "web_3");
    assert_eq!(latest["skipped"][0], "web_2");
}
