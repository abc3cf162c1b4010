//! Per-client token-bucket rate limiting.
//!
//! Buckets are keyed by normalized client IP and live only as long as the
//! process. Cleanup runs inline on whichever call crosses the next-cleanup
//! deadline.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Attempts refilled per window
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Refill window in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Ban applied on denial; 0 disables bans
    #[serde(default)]
    pub ban_secs: u64,
    /// Ceiling on tracked keys; unseen keys are denied beyond it
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: usize,
    /// Honor the first `X-Forwarded-For` hop
    #[serde(default)]
    pub trust_proxy: bool,
}

fn default_max_attempts() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

fn default_burst() -> u32 {
    10
}

fn default_max_tracked_keys() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_secs: default_window_secs(),
            burst: default_burst(),
            ban_secs: 0,
            max_tracked_keys: default_max_tracked_keys(),
            trust_proxy: false,
        }
    }
}

impl RateLimitConfig {
    /// Tokens per second.
    fn refill_rate(&self) -> f64 {
        if self.window_secs == 0 {
            return f64::from(self.max_attempts);
        }
        f64::from(self.max_attempts) / self.window_secs as f64
    }

    /// Idle time after which an unbanned bucket is forgotten.
    fn bucket_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds((self.window_secs + self.ban_secs).max(1) as i64)
    }

    fn ban(&self) -> Option<chrono::Duration> {
        (self.ban_secs > 0).then(|| chrono::Duration::seconds(self.ban_secs as i64))
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed,
    /// Denied; `retry_after` is when a retry could succeed, if known.
    Denied { retry_after: Option<Duration> },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Retry hint in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::Allowed => None,
            Self::Denied { retry_after } => retry_after.map(|d| {
                let secs = d.as_secs();
                if d.subsec_nanos() > 0 {
                    secs + 1
                } else {
                    secs.max(1)
                }
            }),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    blocked_until: Option<DateTime<Utc>>,
}

impl TokenBucket {
    fn new(burst: u32, now: DateTime<Utc>) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: now,
            last_seen: now,
            blocked_until: None,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>, rate: f64, burst: u32) {
        // Floor at zero: a clock stepping backwards mints nothing.
        let elapsed = (now - self.last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(burst));
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    fn try_acquire(&mut self, now: DateTime<Utc>, config: &RateLimitConfig) -> Decision {
        if let Some(until) = self.blocked_until {
            if now < until {
                return Decision::Denied {
                    retry_after: (until - now).to_std().ok(),
                };
            }
            // Ban over: refill restarts from its end.
            self.blocked_until = None;
            if until > self.last_refill {
                self.last_refill = until;
            }
        }

        let rate = config.refill_rate();
        self.refill(now, rate, config.burst);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Decision::Allowed;
        }

        if let Some(ban) = config.ban() {
            self.blocked_until = Some(now + ban);
            return Decision::Denied {
                retry_after: ban.to_std().ok(),
            };
        }

        let retry_after = (rate > 0.0).then(|| Duration::from_secs_f64((1.0 - self.tokens) / rate));
        Decision::Denied { retry_after }
    }
}

#[derive(Debug)]
struct LimiterState {
    buckets: HashMap<String, TokenBucket>,
    /// Unset until the first attempt.
    next_cleanup: Option<DateTime<Utc>>,
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                next_cleanup: None,
            }),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Record an attempt for `key` now.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Utc::now())
    }

    /// Record an attempt for `key` at `now`.
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> Decision {
        let mut state = self.state.lock();

        match state.next_cleanup {
            Some(deadline) if now < deadline => {}
            Some(_) => self.sweep(&mut state, now),
            None => state.next_cleanup = Some(now + self.config.bucket_ttl()),
        }

        if !state.buckets.contains_key(key) {
            if state.buckets.len() >= self.config.max_tracked_keys {
                self.sweep(&mut state, now);
            }
            if state.buckets.len() >= self.config.max_tracked_keys {
                debug!(tracked = state.buckets.len(), "Rate limiter at capacity, denying new key");
                return Decision::Denied { retry_after: None };
            }
            state
                .buckets
                .insert(key.to_string(), TokenBucket::new(self.config.burst, now));
        }

        let Some(bucket) = state.buckets.get_mut(key) else {
            return Decision::Denied { retry_after: None };
        };
        if now > bucket.last_seen {
            bucket.last_seen = now;
        }
        bucket.try_acquire(now, &self.config)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Evict idle buckets. Banned keys are kept until their ban ends.
    fn sweep(&self, state: &mut LimiterState, now: DateTime<Utc>) {
        let ttl = self.config.bucket_ttl();
        let before = state.buckets.len();
        state.buckets.retain(|_, bucket| {
            let banned = bucket.blocked_until.is_some_and(|until| now < until);
            banned || now - bucket.last_seen <= ttl
        });
        state.next_cleanup = Some(now + ttl);

        let evicted = before - state.buckets.len();
        if evicted > 0 {
            debug!(evicted, remaining = state.buckets.len(), "Evicted idle rate-limit buckets");
        }
    }
}

/// Canonical key for an address: IPv4-mapped IPv6 collapses to IPv4.
pub fn normalize_addr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

/// Canonical key for a textual address (bare IP or `ip:port`).
pub fn normalize_ip(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return normalize_addr(ip);
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return normalize_addr(addr.ip());
    }
    let unbracketed = raw.trim_start_matches('[').trim_end_matches(']');
    match unbracketed.parse::<IpAddr>() {
        Ok(ip) => normalize_addr(ip),
        Err(_) => raw.to_ascii_lowercase(),
    }
}
