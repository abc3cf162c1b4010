//! Request extractors.

use std::net::SocketAddr;

use axum::{
    async_trait,
    body::Bytes,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts},
};
use gate::normalize_ip;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::response::ApiError;
use crate::state::AppState;

/// Longest bearer token accepted before any lookup.
const MAX_BEARER_LEN: usize = 512;

/// Resume token from `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken(pub String);

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(ApiError::missing_bearer)?;

        let (scheme, token) = value.trim().split_once(' ').ok_or_else(ApiError::missing_bearer)?;
        let token = token.trim();
        if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() || token.len() > MAX_BEARER_LEN
        {
            return Err(ApiError::missing_bearer());
        }

        Ok(BearerToken(token.to_string()))
    }
}

/// Normalized client address used as the rate-limit key.
///
/// `X-Forwarded-For` (first hop) is honored only when the limiter is
/// configured to trust a proxy; otherwise the socket peer is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn from_parts(parts: &Parts, trust_proxy: bool) -> Self {
        if trust_proxy {
            let forwarded = parts
                .headers
                .get("X-Forwarded-For")
                .and_then(|h| h.to_str().ok())
                .and_then(|xff| xff.split(',').next())
                .map(normalize_ip)
                .filter(|ip| !ip.is_empty());
            if forwarded.is_some() {
                return ClientIp(forwarded);
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| gate::normalize_addr(addr.ip()));
        ClientIp(peer)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(ClientIp::from_parts(parts, state.rate_limiter.config().trust_proxy))
    }
}

/// Per-endpoint body ceiling for [`StrictJson`].
pub trait BodyLimit {
    const MAX_BYTES: usize;
    /// Treat an empty body as `{}`.
    const ALLOW_EMPTY: bool = false;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("request body is required")]
    Empty,
    #[error("request body must be a single JSON object")]
    NotAnObject,
    #[error("invalid request body: {0}")]
    Malformed(String),
}

impl From<BodyError> for ApiError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::TooLarge(limit) => ApiError::payload_too_large(limit),
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

/// Parse exactly one JSON object into `T`.
///
/// Unknown fields are rejected by the target types themselves.
pub fn parse_strict<T: DeserializeOwned>(body: &[u8], allow_empty: bool) -> Result<T, BodyError> {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|i| &body[i..]);

    let body = match start {
        None if allow_empty => b"{}".as_slice(),
        None => return Err(BodyError::Empty),
        Some(rest) if rest[0] != b'{' => return Err(BodyError::NotAnObject),
        Some(rest) => rest,
    };

    serde_json::from_slice(body).map_err(|e| BodyError::Malformed(e.to_string()))
}

/// JSON body that is size-capped, a single object, and free of unknown fields.
#[derive(Debug)]
pub struct StrictJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for StrictJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + BodyLimit,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > T::MAX_BYTES) {
            return Err(BodyError::TooLarge(T::MAX_BYTES).into());
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| ApiError::bad_request("failed to read request body"))?;
        if body.len() > T::MAX_BYTES {
            return Err(BodyError::TooLarge(T::MAX_BYTES).into());
        }

        Ok(StrictJson(parse_strict(&body, T::ALLOW_EMPTY)?))
    }
}
