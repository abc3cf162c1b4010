//! Application state shared across handlers.

use std::sync::Arc;

use gate::{RateLimitConfig, RateLimiter};
use session::SessionService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Session registry and lifecycle
    pub sessions: SessionService,
    /// Guards session creation and resume per client address
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(sessions: SessionService) -> Self {
        Self::with_rate_limit(sessions, RateLimitConfig::default())
    }

    /// Create with custom rate limit config.
    pub fn with_rate_limit(sessions: SessionService, rate_config: RateLimitConfig) -> Self {
        Self {
            sessions,
            rate_limiter: Arc::new(RateLimiter::new(rate_config)),
        }
    }
}
