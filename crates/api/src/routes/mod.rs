//! API routes.

pub mod health;
pub mod sessions;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware::rate_limit::limit_by_client;
use crate::state::AppState;

/// Creates the API router.
///
/// Only session creation and resume are rate limited; per-session calls
/// are already bound to a token.
pub fn router(state: AppState) -> Router {
    let admission = Router::new()
        .route("/sessions", post(sessions::open_session))
        .route("/sessions/resume", post(sessions::resume_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_by_client));

    Router::new()
        .merge(admission)
        .route("/sessions/:id", delete(sessions::close_session))
        .route("/sessions/:id/stdin", post(sessions::write_stdin))
        .route("/sessions/:id/resize", post(sessions::resize_session))
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
