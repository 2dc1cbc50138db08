//! Integration tests for the companion HTTP API
//!
//! Tests API endpoints with the rule engine standing in for the model

use pulsepilot::core::{
    create_router, AppState, CommandRuntime, InferenceOrchestrator, LoaderConfig, ModelLoader,
    OrchestratorConfig,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use std::sync::Arc;
use tower::ServiceExt;
use serde_json::{json, Value};

fn create_test_state() -> Arc<AppState> {
    // Never started: every analysis goes to the rule engine
    let loader = ModelLoader::new(
        Arc::new(CommandRuntime::new("/nonexistent/llama-cli")),
        LoaderConfig {
            cache_dir: std::env::temp_dir().join("pulsepilot-api-tests"),
            tiers: Vec::new(),
        },
    );
    AppState::new(InferenceOrchestrator::new(Arc::new(loader), OrchestratorConfig::default()))
}

fn post_message(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/message")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_router(create_test_state());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["model"], "Model not loaded");
    assert_eq!(json["subscribers"], 0);
}

#[tokio::test]
async fn test_latest_assessment_not_found() {
    let app = create_router(create_test_state());

    let response = app
        .oneshot(Request::builder().uri("/assessment/latest").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_message_type() {
    let app = create_router(create_test_state());

    let response = app.oneshot(post_message(json!({"type": "unknown_type"}))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"status": "error", "message": "Unknown message type"})
    );
}

#[tokio::test]
async fn test_request_without_health_data() {
    let app = create_router(create_test_state());

    let response = app
        .oneshot(post_message(json!({"type": "risk_assessment_request"})))
        .await
        .unwrap();

    assert_eq!(
        body_json(response).await,
        json!({"status": "error", "message": "No health data available"})
    );
}

#[tokio::test]
async fn test_full_assessment_flow() {
    // Create app with shared state
    let state = create_test_state();

    let health_data = json!({
        "type": "health_data",
        "timestamp": 1_700_000_000.0,
        "requestRiskAssessment": true,
        "heartRate": [{"value": 118.0, "timestamp": 1_700_000_000.0, "unit": "BPM"}]
    });
    let response = create_router(state.clone()).oneshot(post_message(health_data)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let reply = body_json(response).await;
    assert_eq!(reply["status"], "received");
    assert_eq!(reply["riskAssessment"]["riskLevel"], "Medium");
    assert_eq!(reply["riskAssessment"]["riskFactors"][0]["type"], "ElevatedHeartRate");

    // Latest assessment now available
    let response = create_router(state.clone())
        .oneshot(Request::builder().uri("/assessment/latest").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let latest = body_json(response).await;
    assert_eq!(latest["riskLevel"], "Medium");

    // A follow-up request reuses the stored snapshot
    let response = create_router(state)
        .oneshot(post_message(json!({"type": "risk_assessment_request"})))
        .await
        .unwrap();
    let reply = body_json(response).await;
    assert_eq!(reply["status"], "received");
    assert_eq!(reply["riskAssessment"]["riskLevel"], "Medium");
}

#[tokio::test]
async fn test_health_data_without_request_is_acknowledged() {
    let app = create_router(create_test_state());

    let health_data = json!({
        "type": "health_data",
        "timestamp": 1_700_000_000.0,
        "hrv": [{"value": 45.0, "timestamp": 1_700_000_000.0, "unit": "ms"}]
    });
    let reply = body_json(app.oneshot(post_message(health_data)).await.unwrap()).await;

    assert_eq!(reply, json!({"status": "received"}));
}
