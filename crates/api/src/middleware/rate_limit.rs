//! Rate limiting middleware for session creation and resume.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use gate::stages::RATE_LIMITED_MESSAGE;
use telemetry::metrics;
use tracing::warn;

use crate::extractors::ClientIp;
use crate::response::ApiError;
use crate::state::AppState;

/// Key used when neither a peer address nor a trusted proxy header is present.
const UNKNOWN_CLIENT: &str = "unknown";

/// Consume one token from the caller's bucket or reject with `RATE_001`.
pub async fn limit_by_client(
    State(state): State<AppState>,
    ClientIp(client): ClientIp,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client.as_deref().unwrap_or(UNKNOWN_CLIENT);
    let decision = state.rate_limiter.check(key);

    if !decision.is_allowed() {
        metrics().rate_limited_requests.inc();
        warn!(
            client = %key,
            path = %request.uri().path(),
            retry_after = ?decision.retry_after_secs(),
            "Request rate limited"
        );
        return Err(ApiError::rate_limited(
            RATE_LIMITED_MESSAGE,
            decision.retry_after_secs(),
        ));
    }

    Ok(next.run(request).await)
}
