//! Session data model.

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Destination of the outbound SSH invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl Target {
    /// `user@host`, as passed to the SSH client.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Resource ceilings for one session's subprocess tree.
///
/// Immutable once the session exists; enforced by the launcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionLimits {
    /// CPU time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_seconds: Option<u64>,
    /// Address-space ceiling in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    /// Wall-clock lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_seconds: Option<u64>,
}

impl SessionLimits {
    pub fn max_duration(&self) -> Option<StdDuration> {
        self.max_duration_seconds
            .filter(|s| *s > 0)
            .map(StdDuration::from_secs)
    }

    /// Whether the command needs a resource-limiting wrapper.
    pub fn needs_rlimit(&self) -> bool {
        self.cpu_seconds.is_some_and(|s| s > 0) || self.memory_bytes.is_some_and(|b| b > 0)
    }
}

/// A validated request to open a session.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub target: Target,
    /// Caller-supplied remote command; always rejected.
    pub command: Option<String>,
    pub env: BTreeMap<String, String>,
    pub limits: SessionLimits,
}

/// Durable metadata for one session.
///
/// The raw resume token never appears here; `token_hash` holds its keyed
/// hash while the session is resumable and is cleared on close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub user: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub limits: SessionLimits,
    pub started_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_hash: Option<String>,
}

impl SessionMetadata {
    /// Creates metadata for a session starting now.
    ///
    /// `expires_at` is the max duration when one is set, otherwise `ttl`.
    pub fn new(
        session_id: String,
        target: &Target,
        limits: SessionLimits,
        token_hash: String,
        ttl: StdDuration,
        now: DateTime<Utc>,
    ) -> Self {
        let lifetime = limits.max_duration().unwrap_or(ttl);
        let lifetime = Duration::from_std(lifetime).unwrap_or(Duration::days(1));
        Self {
            session_id,
            user: target.user.clone(),
            host: target.host.clone(),
            port: target.port,
            limits,
            started_at: now,
            last_seen_at: now,
            expires_at: now + lifetime,
            connected: false,
            token_hash: Some(token_hash),
        }
    }

    pub fn target(&self) -> Target {
        Target {
            user: self.user.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// Checks whether the session is past its deadline or idle ceiling.
    pub fn is_expired_at(&self, now: DateTime<Utc>, idle_timeout: StdDuration) -> bool {
        if now >= self.expires_at {
            return true;
        }
        match Duration::from_std(idle_timeout) {
            Ok(idle) => now - self.last_seen_at > idle,
            Err(_) => false,
        }
    }

    /// Records activity.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen_at {
            self.last_seen_at = now;
        }
    }

    /// No live process. The token still resolves to the stored record.
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Terminal state: disconnected and no longer resumable.
    pub fn mark_closed(&mut self) {
        self.connected = false;
        self.token_hash = None;
    }
}
