//! Live session registry.
//!
//! Two maps that only ever change together: session id to live session,
//! and resume-token hash to session id. Callers hold the service's single
//! mutex around every compound update.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::SessionMetadata;
use launcher::ProcessHandle;
use tokio_util::sync::CancellationToken;

/// A session with a running process.
pub(crate) struct LiveSession {
    pub meta: SessionMetadata,
    pub handle: Arc<dyn ProcessHandle>,
    pub cancel: CancellationToken,
}

/// How a token resolved against the registry.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TokenMatch {
    /// Token belongs to this session.
    Owner,
    /// Token belongs to another session, or to none while this one is live.
    Mismatch,
    /// Neither the token nor the session is live.
    Unknown,
}

#[derive(Default)]
pub(crate) struct Registry {
    sessions: HashMap<String, LiveSession>,
    tokens: HashMap<String, String>,
    /// Opens that passed the capacity check but have not registered yet.
    pending: usize,
}

impl Registry {
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Claim a slot for an open in flight. False when at capacity.
    pub fn reserve(&mut self, max_sessions: usize) -> bool {
        if self.sessions.len() + self.pending >= max_sessions {
            return false;
        }
        self.pending += 1;
        true
    }

    pub fn release(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    /// Register a launched session under both keys.
    ///
    /// Hands the session back if either key is already taken.
    pub fn insert(&mut self, live: LiveSession) -> Result<(), LiveSession> {
        let Some(hash) = live.meta.token_hash.clone() else {
            return Err(live);
        };
        if self.tokens.contains_key(&hash) {
            return Err(live);
        }
        match self.sessions.entry(live.meta.session_id.clone()) {
            Entry::Occupied(_) => Err(live),
            Entry::Vacant(slot) => {
                self.tokens.insert(hash, live.meta.session_id.clone());
                slot.insert(live);
                Ok(())
            }
        }
    }

    /// Remove a session and its token entry together.
    pub fn remove(&mut self, session_id: &str) -> Option<LiveSession> {
        let live = self.sessions.remove(session_id)?;
        if let Some(ref hash) = live.meta.token_hash {
            if self.tokens.get(hash).map(String::as_str) == Some(session_id) {
                self.tokens.remove(hash);
            }
        }
        Some(live)
    }

    pub fn resolve(&self, session_id: &str, token_hash: &str) -> TokenMatch {
        match self.tokens.get(token_hash) {
            Some(owner) if owner == session_id => TokenMatch::Owner,
            Some(_) => TokenMatch::Mismatch,
            None if self.sessions.contains_key(session_id) => TokenMatch::Mismatch,
            None => TokenMatch::Unknown,
        }
    }

    pub fn session_for_token(&self, token_hash: &str) -> Option<&str> {
        self.tokens.get(token_hash).map(String::as_str)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut LiveSession> {
        self.sessions.get_mut(session_id)
    }

    pub fn drain(&mut self) -> Vec<LiveSession> {
        self.tokens.clear();
        self.sessions.drain().map(|(_, live)| live).collect()
    }
}
