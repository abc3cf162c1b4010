//! Tests for health check endpoints.
//!
//! The health registry is process-global, so every assertion that depends on
//! a component's state lives in one test.

use axum::http::StatusCode;
use integration_tests::setup::{open_session, TestContext};
use serde_json::Value;
use telemetry::health;

/// /health reports components and the live session count
#[tokio::test]
async fn test_health_endpoint_structure() {
    let ctx = TestContext::new();
    let server = ctx.server();
    open_session(&server, "alice", "example.com").await;

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    for field in ["status", "store_healthy", "launcher_healthy", "active_sessions"] {
        assert!(body.get(field).is_some(), "Response should have '{}' field", field);
    }
    assert_eq!(body["active_sessions"], 1);
    // Process-wide counters, shared with other tests in this binary
    assert!(body["metrics"]["sessions_opened"].as_u64().unwrap() >= 1);
    assert!(body["metrics"]["timestamp"].is_string());

    let status = body["status"].as_str().unwrap_or("");
    assert!(
        status == "healthy" || status == "degraded" || status == "unhealthy",
        "Unexpected status '{}'",
        status
    );
}

/// Readiness follows launcher health; liveness is unconditional
#[tokio::test]
async fn test_ready_follows_launcher() {
    let ctx = TestContext::new();
    let server = ctx.server();

    health().launcher.set_unhealthy("ssh client not found");
    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server.get("/health/live").await.assert_status_ok();

    health().launcher.set_healthy();
    server.get("/health/ready").await.assert_status_ok();

    health().store.set_healthy();
    let body: Value = server.get("/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["launcher_healthy"], true);
}
