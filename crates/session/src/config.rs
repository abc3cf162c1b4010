//! Session service configuration.

use std::time::Duration;

use gateway_core::TokenHasher;
use serde::{Deserialize, Serialize};

/// Session lifetime and capacity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity ceiling before a session counts as expired
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Lifetime of a session without its own max duration
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Maximum live sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Key for resume-token hashing; random per process when unset
    #[serde(default)]
    pub token_secret: Option<String>,
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_session_ttl_secs() -> u64 {
    12 * 60 * 60
}

fn default_max_sessions() -> usize {
    64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
            token_secret: None,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn token_hasher(&self) -> TokenHasher {
        match self.token_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => TokenHasher::new(secret),
            None => TokenHasher::random(),
        }
    }
}
