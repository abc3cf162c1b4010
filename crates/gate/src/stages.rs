//! The standard gating stages.
//!
//! Order matters: [`RateLimitStage`] is cheapest and runs first, then
//! [`ConcurrencyCap`], [`IdentityRouter`], and finally [`Bookkeeping`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use telemetry::{metrics, Gauge};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::chain::{Connection, Middleware, Next};
use crate::rate_limit::{normalize_addr, RateLimiter};

pub const RATE_LIMITED_MESSAGE: &str = "too many connection attempts, try again later";
pub const CAPACITY_MESSAGE: &str = "max sessions exceeded";
pub const UNKNOWN_IDENTITY_MESSAGE: &str = "unknown identity";
pub const INVALID_IDENTITY_MESSAGE: &str = "invalid identity";

/// Longest accepted identity line.
pub const MAX_IDENTITY_LEN: usize = 64;

/// Context keys written by the stages.
pub mod keys {
    pub const ROUTE: &str = "route";
    pub const IDENTITY: &str = "identity";
    pub const CONNECTION_ID: &str = "connection_id";
    pub const STARTED_AT: &str = "started_at";
    pub const ENDED_AT: &str = "ended_at";
}

/// Per-peer connection-rate limiting.
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimitStage {
    async fn call(&self, conn: &mut Connection, next: Next<'_>) -> anyhow::Result<()> {
        let key = normalize_addr(conn.peer.ip());
        let decision = self.limiter.check(&key);
        if !decision.is_allowed() {
            metrics().rate_limited_requests.inc();
            metrics().gate_rejections.inc();
            warn!(client = %key, retry_after = ?decision.retry_after_secs(), "Connection rate limited");
            conn.send_line(RATE_LIMITED_MESSAGE).await?;
            return Ok(());
        }
        next.run(conn).await
    }
}

/// Global cap on concurrent connections. Excess callers are refused, not queued.
pub struct ConcurrencyCap {
    permits: Arc<Semaphore>,
    max: usize,
}

impl ConcurrencyCap {
    pub fn new(max: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Middleware for ConcurrencyCap {
    async fn call(&self, conn: &mut Connection, next: Next<'_>) -> anyhow::Result<()> {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            metrics().gate_rejections.inc();
            warn!(peer = %conn.peer, max = self.max, "Connection refused at capacity");
            conn.send_line(CAPACITY_MESSAGE).await?;
            return Ok(());
        };

        let _active = ActiveConnection::new(permit, &metrics().active_gate_connections);
        next.run(conn).await
    }
}

/// Holds a capacity permit and the active-connection gauge for as long as
/// the connection lives, including when its future is dropped mid-flight.
struct ActiveConnection {
    _permit: OwnedSemaphorePermit,
    gauge: &'static Gauge,
}

impl ActiveConnection {
    fn new(permit: OwnedSemaphorePermit, gauge: &'static Gauge) -> Self {
        gauge.inc();
        Self {
            _permit: permit,
            gauge,
        }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Maps announced identities to routes. Unknown identities never get further.
///
/// A connection that arrives without an identity announces it on its first
/// line; that read happens here, behind the earlier stages.
pub struct IdentityRouter {
    routes: HashMap<String, String>,
}

impl IdentityRouter {
    pub fn new(routes: HashMap<String, String>) -> Self {
        Self { routes }
    }

    pub fn resolve(&self, identity: &str) -> Option<&str> {
        self.routes.get(identity).map(String::as_str)
    }
}

#[async_trait]
impl Middleware for IdentityRouter {
    async fn call(&self, conn: &mut Connection, next: Next<'_>) -> anyhow::Result<()> {
        if conn.identity.is_empty() {
            let Some(line) = conn.read_line().await.context("reading identity")? else {
                return Ok(());
            };
            let identity = line.trim();
            if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN {
                metrics().gate_rejections.inc();
                debug!(peer = %conn.peer, len = identity.len(), "Invalid identity line");
                conn.send_line(INVALID_IDENTITY_MESSAGE).await?;
                return Ok(());
            }
            conn.identity = identity.to_string();
        }

        let Some(route) = self.resolve(&conn.identity).map(str::to_string) else {
            metrics().gate_rejections.inc();
            warn!(peer = %conn.peer, identity = %conn.identity, "Unknown identity");
            conn.send_line(UNKNOWN_IDENTITY_MESSAGE).await?;
            return Ok(());
        };
        conn.context.set(keys::ROUTE, route);
        next.run(conn).await
    }
}

/// Records connection start/end and exposes the identity to the handler.
#[derive(Debug, Default)]
pub struct Bookkeeping;

#[async_trait]
impl Middleware for Bookkeeping {
    async fn call(&self, conn: &mut Connection, next: Next<'_>) -> anyhow::Result<()> {
        let started = Utc::now();
        conn.context.set(keys::IDENTITY, conn.identity.clone());
        conn.context.set(keys::CONNECTION_ID, conn.id.to_string());
        conn.context.set(keys::STARTED_AT, started.to_rfc3339());
        info!(
            connection_id = %conn.id,
            peer = %conn.peer,
            identity = %conn.identity,
            route = conn.context.get_str(keys::ROUTE).unwrap_or_default(),
            "Interactive session started"
        );

        let result = next.run(conn).await;

        let ended = Utc::now();
        conn.context.set(keys::ENDED_AT, ended.to_rfc3339());
        info!(
            connection_id = %conn.id,
            duration_ms = (ended - started).num_milliseconds(),
            ok = result.is_ok(),
            "Interactive session ended"
        );
        result
    }
}
