//! End-to-end tests for the session lifecycle over HTTP.
//!
//! Real router and session service; `MockLauncher` stands in for ssh.

use axum::http::StatusCode;
use integration_tests::{
    fixtures,
    setup::{eventually, open_session, TestContext},
};
use metadata_store::MetadataStore;
use serde_json::Value;

/// Open returns ids and forwards target and limits to the launcher unchanged
#[tokio::test]
async fn test_open_session_returns_ids_and_propagates_limits() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let response = server
        .post("/sessions")
        .json(&fixtures::open_body_with_limits("alice", "example.com"))
        .await;
    response.assert_status(StatusCode::CREATED);

    let body: Value = response.json();
    let session_id = body["session_id"].as_str().unwrap();
    let token = body["resume_token"].as_str().unwrap();
    assert_eq!(session_id.len(), 32);
    assert!(!token.is_empty());
    assert_ne!(session_id, token);
    assert_eq!(body["connected"], true);
    assert!(body.get("token_hash").is_none(), "Token hash must not leak");

    let launches = ctx.launcher.launches();
    assert_eq!(launches.len(), 1);
    let meta = &launches[0].metadata;
    assert_eq!(meta.user, "alice");
    assert_eq!(meta.host, "example.com");
    assert_eq!(meta.port, 2200);
    assert_eq!(meta.limits.cpu_seconds, Some(120));
    assert_eq!(meta.limits.memory_bytes, Some(536_870_912));
    assert_eq!(meta.limits.max_duration_seconds, Some(3600));
    assert_eq!(launches[0].env.get("LANG").map(String::as_str), Some("C.UTF-8"));
}

/// Port defaults to 22 when omitted
#[tokio::test]
async fn test_open_session_defaults_port() {
    let ctx = TestContext::new();
    let server = ctx.server();

    let opened = open_session(&server, "alice", "example.com").await;
    assert_eq!(opened.body["port"], 22);
}

/// Stdin is base64-decoded and written to the terminal
#[tokio::test]
async fn test_stdin_write_reaches_process() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let opened = open_session(&server, "alice", "example.com").await;

    let response = server
        .post(&format!("/sessions/{}/stdin", opened.session_id))
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .json(&fixtures::stdin_body(b"pwd\n"))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let process = ctx.launcher.last_process().unwrap();
    assert_eq!(process.written(), b"pwd\n".to_vec());
}

/// Resize within bounds is accepted; out of range is rejected before the process
#[tokio::test]
async fn test_resize_bounds() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let opened = open_session(&server, "alice", "example.com").await;
    let path = format!("/sessions/{}/resize", opened.session_id);

    let response = server
        .post(&path)
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .json(&fixtures::resize_body(120, 40))
        .await;
    response.assert_status(StatusCode::ACCEPTED);

    let response = server
        .post(&path)
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .json(&fixtures::resize_body(5000, 40))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "REQ_001");

    let process = ctx.launcher.last_process().unwrap();
    assert_eq!(process.resizes(), vec![(120, 40)]);
}

/// Close returns 204, stops the process, and later writes are refused
#[tokio::test]
async fn test_close_then_write_is_not_found() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let opened = open_session(&server, "alice", "example.com").await;

    let response = server
        .delete(&format!("/sessions/{}", opened.session_id))
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    let process = ctx.launcher.last_process().unwrap();
    assert_eq!(process.close_calls(), 1);
    assert_eq!(ctx.sessions.live_count(), 0);

    let response = server
        .post(&format!("/sessions/{}/stdin", opened.session_id))
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .json(&fixtures::stdin_body(b"ls\n"))
        .await;
    let status = response.status_code();
    assert!(
        status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN,
        "Expected 404 or 403 after close, got {}",
        status
    );
}

/// Second close of the same session is not-found
#[tokio::test]
async fn test_close_twice() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let opened = open_session(&server, "alice", "example.com").await;
    let path = format!("/sessions/{}", opened.session_id);

    server
        .delete(&path)
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let response = server
        .delete(&path)
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "SESS_001");
}

/// Resume refreshes last_seen_at on a live session
#[tokio::test]
async fn test_resume_refreshes_last_seen() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let opened = open_session(&server, "alice", "example.com").await;
    let opened_last_seen = opened.body["last_seen_at"].as_str().unwrap().to_string();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let response = server
        .post("/sessions/resume")
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["session_id"], opened.session_id.as_str());
    assert_eq!(body["connected"], true);
    assert!(body.get("resume_token").is_none());

    let before = chrono::DateTime::parse_from_rfc3339(&opened_last_seen).unwrap();
    let after = chrono::DateTime::parse_from_rfc3339(body["last_seen_at"].as_str().unwrap()).unwrap();
    assert!(after > before, "last_seen_at should advance on resume");
}

/// Resume with a token that was never issued is not-found
#[tokio::test]
async fn test_resume_unknown_token() {
    let ctx = TestContext::new();
    let server = ctx.server();
    open_session(&server, "alice", "example.com").await;

    let response = server
        .post("/sessions/resume")
        .add_header("Authorization", fixtures::bearer("never-issued-token"))
        .json(&serde_json::json!({}))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "SESS_001");
    assert_eq!(body["status"], 404);
}

/// A process dying on its own converges to disconnected without an explicit close
#[tokio::test]
async fn test_process_exit_disconnects_session() {
    let ctx = TestContext::new();
    let server = ctx.server();
    let opened = open_session(&server, "alice", "example.com").await;

    let process = ctx.launcher.last_process().unwrap();
    process.exit(launcher::ProcessExit::Success);

    let sessions = ctx.sessions.clone();
    assert!(eventually(|| sessions.live_count() == 0).await);

    let stored = wait_for_disconnected_record(&ctx, &opened.session_id).await;
    assert!(!stored.connected);
    assert!(stored.token_hash.is_some(), "Exit keeps the record resumable");
    assert_eq!(process.close_calls(), 0, "Exited process is not closed again");

    let response = server
        .post("/sessions/resume")
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["session_id"], opened.session_id.as_str());
    assert_eq!(body["connected"], false);

    // Nothing live to drive
    let response = server
        .post(&format!("/sessions/{}/stdin", opened.session_id))
        .add_header("Authorization", fixtures::bearer(&opened.resume_token))
        .json(&fixtures::stdin_body(b"ls\n"))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

async fn wait_for_disconnected_record(ctx: &TestContext, session_id: &str) -> gateway_core::SessionMetadata {
    for _ in 0..200 {
        if let Some(meta) = ctx.store.lookup(session_id).await.unwrap() {
            if !meta.connected {
                return meta;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("session {} never reached the disconnected state", session_id);
}
