//! Standardized API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use gateway_core::{Error, SessionLimits, SessionMetadata};
use telemetry::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Session as shown to callers. Never carries the token hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    pub limits: SessionLimits,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub connected: bool,
}

impl From<SessionMetadata> for SessionView {
    fn from(meta: SessionMetadata) -> Self {
        Self {
            session_id: meta.session_id,
            user: meta.user,
            host: meta.host,
            port: meta.port,
            limits: meta.limits,
            started_at: meta.started_at,
            last_seen_at: meta.last_seen_at,
            expires_at: meta.expires_at,
            connected: meta.connected,
        }
    }
}

/// Response for `POST /sessions`. The only place the raw token is returned.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    #[serde(flatten)]
    pub session: SessionView,
    pub resume_token: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store_healthy: bool,
    pub launcher_healthy: bool,
    pub active_sessions: usize,
    pub metrics: MetricsSnapshot,
}

/// Error envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub status: u16,
}

/// API error type with stable error codes.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse {
                code: code.into(),
                message: msg.into(),
                status: status.as_u16(),
            },
            retry_after: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "REQ_001", msg)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::with_code(
            StatusCode::PAYLOAD_TOO_LARGE,
            "REQ_002",
            format!("request body exceeds {} bytes", limit),
        )
    }

    pub fn missing_bearer() -> Self {
        Self::with_code(
            StatusCode::UNAUTHORIZED,
            "AUTH_001",
            "missing bearer token",
        )
    }

    pub fn rate_limited(msg: impl Into<String>, retry_after: Option<u64>) -> Self {
        let mut err = Self::with_code(StatusCode::TOO_MANY_REQUESTS, "RATE_001", msg);
        err.retry_after = retry_after;
        err
    }

    pub fn code(&self) -> &str {
        &self.response.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.response)).into_response();

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match &err {
            Error::PersistenceFailed(detail) => {
                error!(detail = %detail, "Session metadata write failed");
            }
            Error::LaunchFailed { reason, source } => {
                warn!(code = reason.code(), error = %source, "Session launch failed");
            }
            Error::Internal(detail) => {
                error!(detail = %detail, "Internal error");
            }
            Error::RateLimited { retry_after } => {
                return ApiError::rate_limited(err.public_message(), *retry_after);
            }
            Error::InvalidRequest(_)
            | Error::Unauthorized
            | Error::SessionNotFound
            | Error::SessionExpired
            | Error::CapacityExceeded => {}
        }

        ApiError::with_code(status, err.code(), err.public_message())
    }
}
