//! Admission control for the terminal-session gateway.
//!
//! A per-client [`RateLimiter`] shared by the HTTP surface and the
//! interactive transport, and the ordered middleware [`Chain`] that gates
//! the transport: rate limit, concurrency cap, identity routing, then
//! bookkeeping.

pub mod chain;
pub mod rate_limit;
pub mod stages;
pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;

pub use chain::{Chain, Connection, Handler, Middleware, Next, SessionContext};
pub use rate_limit::{normalize_addr, normalize_ip, Decision, RateLimitConfig, RateLimiter};
pub use stages::{Bookkeeping, ConcurrencyCap, IdentityRouter, RateLimitStage};
pub use transport::{serve, TransportConfig};

/// The standard chain: rate limit, concurrency cap, identity routing,
/// bookkeeping, then `handler`.
pub fn standard_chain(
    limiter: Arc<RateLimiter>,
    max_concurrent: usize,
    routes: HashMap<String, String>,
    handler: Arc<dyn Handler>,
) -> Chain {
    Chain::new(handler)
        .with(RateLimitStage::new(limiter))
        .with(ConcurrencyCap::new(max_concurrent))
        .with(IdentityRouter::new(routes))
        .with(Bookkeeping)
}
