//! Session endpoints.
//!
//! Thin mapping over [`session::SessionService`]. Every per-session route
//! checks the id shape and requires a bearer token before the service is
//! consulted.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use gateway_core::{
    is_valid_session_id,
    limits::{
        MAX_OPEN_BODY_BYTES, MAX_RESIZE_BODY_BYTES, MAX_RESUME_BODY_BYTES, MAX_STDIN_BODY_BYTES,
        MAX_STDIN_BYTES,
    },
    validation::validate_target,
    OpenRequest, SessionLimits,
};
use serde::Deserialize;
use tracing::{debug, info};
use validator::Validate;

use crate::extractors::{BearerToken, BodyLimit, StrictJson};
use crate::response::{ApiError, OpenSessionResponse, SessionView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenSessionRequest {
    pub user: String,
    pub host: String,
    /// 0 or absent selects the default SSH port
    #[serde(default)]
    pub port: u32,
    /// Always refused; present so the refusal is explicit
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: SessionLimits,
}

impl BodyLimit for OpenSessionRequest {
    const MAX_BYTES: usize = MAX_OPEN_BODY_BYTES;
}

/// The token travels in the header; the body is empty or `{}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResumeRequest {}

impl BodyLimit for ResumeRequest {
    const MAX_BYTES: usize = MAX_RESUME_BODY_BYTES;
    const ALLOW_EMPTY: bool = true;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdinRequest {
    /// Base64 (standard alphabet) encoded bytes
    pub data: String,
}

impl BodyLimit for StdinRequest {
    const MAX_BYTES: usize = MAX_STDIN_BODY_BYTES;
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ResizeRequest {
    #[validate(range(min = 1, max = 4096))]
    pub cols: u32,
    #[validate(range(min = 1, max = 4096))]
    pub rows: u32,
}

impl BodyLimit for ResizeRequest {
    const MAX_BYTES: usize = MAX_RESIZE_BODY_BYTES;
}

fn check_session_id(id: &str) -> Result<(), ApiError> {
    if is_valid_session_id(id) {
        Ok(())
    } else {
        Err(ApiError::bad_request("malformed session id"))
    }
}

/// POST /sessions - Launch a new session.
pub async fn open_session(
    State(state): State<AppState>,
    StrictJson(body): StrictJson<OpenSessionRequest>,
) -> Result<(StatusCode, Json<OpenSessionResponse>), ApiError> {
    let target = validate_target(&body.user, &body.host, body.port)?;
    let request = OpenRequest {
        target,
        command: body.command,
        env: body.env,
        limits: body.limits,
    };

    let opened = state.sessions.open(request).await?;
    info!(
        session_id = %opened.metadata.session_id,
        user = %opened.metadata.user,
        host = %opened.metadata.host,
        "Session opened"
    );

    Ok((
        StatusCode::CREATED,
        Json(OpenSessionResponse {
            session: opened.metadata.into(),
            resume_token: opened.resume_token,
        }),
    ))
}

/// POST /sessions/resume - Refresh a session by its resume token.
pub async fn resume_session(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    StrictJson(_): StrictJson<ResumeRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let metadata = state.sessions.resume(&token).await?;
    debug!(session_id = %metadata.session_id, "Session resumed");
    Ok(Json(metadata.into()))
}

/// DELETE /sessions/:id - Close a session.
pub async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    BearerToken(token): BearerToken,
) -> Result<StatusCode, ApiError> {
    check_session_id(&id)?;
    state.sessions.close(&id, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /sessions/:id/stdin - Write bytes to the session's terminal.
pub async fn write_stdin(
    State(state): State<AppState>,
    Path(id): Path<String>,
    BearerToken(token): BearerToken,
    StrictJson(body): StrictJson<StdinRequest>,
) -> Result<StatusCode, ApiError> {
    check_session_id(&id)?;

    let data = STANDARD
        .decode(body.data.as_bytes())
        .map_err(|_| ApiError::bad_request("data must be base64"))?;
    if data.len() > MAX_STDIN_BYTES {
        return Err(ApiError::payload_too_large(MAX_STDIN_BYTES));
    }

    state.sessions.write_stdin(&id, &token, &data).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /sessions/:id/resize - Set terminal geometry.
pub async fn resize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    BearerToken(token): BearerToken,
    StrictJson(body): StrictJson<ResizeRequest>,
) -> Result<StatusCode, ApiError> {
    check_session_id(&id)?;
    body.validate()
        .map_err(|e| ApiError::bad_request(format!("invalid terminal size: {}", e)))?;

    state
        .sessions
        .resize(&id, &token, body.cols, body.rows)
        .await?;
    Ok(StatusCode::ACCEPTED)
}
