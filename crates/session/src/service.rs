//! Session service: lifecycle, authorization, and supervision.
//!
//! State machine per session: OPEN (process launched, registry entries
//! present) to either CLOSED (explicit close; the token stops resolving) or
//! DISCONNECTED (expiry at access time, process exit seen by the watcher, or
//! shutdown; resume still answers from the store). No id is ever reopened.

use std::io;
use std::sync::Arc;

use chrono::Utc;
use gateway_core::limits::{MAX_TERMINAL_DIMENSION, MIN_TERMINAL_DIMENSION};
use gateway_core::validation::validate_open;
use gateway_core::{
    is_valid_session_id, new_resume_token, new_session_id, Error, OpenRequest, Result,
    SessionMetadata, TokenHasher,
};
use launcher::{Launcher, ProcessHandle};
use metadata_store::MetadataStore;
use parking_lot::Mutex;
use telemetry::{health, metrics};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::registry::{LiveSession, Registry, TokenMatch};

/// Result of a successful open. The only place the raw token appears.
#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub metadata: SessionMetadata,
    pub resume_token: String,
}

struct Inner {
    launcher: Arc<dyn Launcher>,
    store: Arc<dyn MetadataStore>,
    hasher: TokenHasher,
    config: SessionConfig,
    registry: Mutex<Registry>,
    /// Parent of every session's cancellation token.
    root: CancellationToken,
}

/// The session registry and its operations.
///
/// Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct SessionService {
    inner: Arc<Inner>,
}

/// Releases an open's capacity reservation on every exit path.
struct Reservation<'a> {
    registry: &'a Mutex<Registry>,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.lock().release();
    }
}

impl SessionService {
    /// Creates a service with default settings.
    pub fn new(launcher: Arc<dyn Launcher>, store: Arc<dyn MetadataStore>) -> Self {
        Self::with_config(launcher, store, SessionConfig::default())
    }

    /// Creates a service with custom settings.
    pub fn with_config(
        launcher: Arc<dyn Launcher>,
        store: Arc<dyn MetadataStore>,
        config: SessionConfig,
    ) -> Self {
        let hasher = config.token_hasher();
        Self {
            inner: Arc::new(Inner {
                launcher,
                store,
                hasher,
                config,
                registry: Mutex::new(Registry::default()),
                root: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Number of sessions with a live process.
    pub fn live_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Open a session: validate, launch, register, persist.
    pub async fn open(&self, request: OpenRequest) -> Result<OpenedSession> {
        validate_open(&request)?;

        let inner = &self.inner;
        if inner.root.is_cancelled() {
            return Err(Error::CapacityExceeded);
        }
        if !inner.registry.lock().reserve(inner.config.max_sessions) {
            warn!(max_sessions = inner.config.max_sessions, "Session capacity reached");
            return Err(Error::CapacityExceeded);
        }
        let reservation = Reservation {
            registry: &inner.registry,
        };

        let session_id = new_session_id();
        let resume_token = new_resume_token();
        let mut meta = SessionMetadata::new(
            session_id.clone(),
            &request.target,
            request.limits,
            inner.hasher.hash(&resume_token),
            inner.config.session_ttl(),
            Utc::now(),
        );

        let cancel = inner.root.child_token();
        let handle = match inner.launcher.launch(&cancel, &meta, &request.env).await {
            Ok(handle) => handle,
            Err(e) => {
                metrics().launch_failures.inc();
                let err = Error::launch(e);
                warn!(
                    session_id = %session_id,
                    destination = %request.target.destination(),
                    code = err.code(),
                    error = %err,
                    "Session launch failed"
                );
                return Err(err);
            }
        };

        meta.connected = true;
        let live = LiveSession {
            meta: meta.clone(),
            handle: Arc::clone(&handle),
            cancel,
        };
        let registered = {
            let mut registry = inner.registry.lock();
            let result = registry.insert(live);
            metrics().active_sessions.set(registry.len() as u64);
            result
        };
        drop(reservation);

        if let Err(rejected) = registered {
            error!(session_id = %session_id, "Session id collision, discarding process");
            rejected.cancel.cancel();
            if let Err(e) = rejected.handle.close().await {
                warn!(session_id = %session_id, error = %e, "Failed to close discarded process");
            }
            return Err(Error::internal("session id collision"));
        }

        if let Err(e) = inner.persist(&meta).await {
            error!(session_id = %session_id, error = %e, "Failed to persist new session, closing it");
            if let Some(live) = inner.take(&session_id) {
                let _ = inner.teardown(live, Ending::Closed).await;
            }
            return Err(e);
        }

        // An exit before this point is still observed: the signal keeps its value.
        self.spawn_watcher(session_id.clone(), handle);

        metrics().sessions_opened.inc();
        info!(
            session_id = %session_id,
            destination = %request.target.destination(),
            port = request.target.port,
            "Session opened"
        );

        Ok(OpenedSession {
            metadata: meta,
            resume_token,
        })
    }

    /// Refresh a session by its resume token.
    ///
    /// Metadata only: the process, if any, is not reattached to anything.
    pub async fn resume(&self, token: &str) -> Result<SessionMetadata> {
        let inner = &self.inner;
        let hash = inner.hasher.hash(token);
        let now = Utc::now();

        enum Found {
            Live(SessionMetadata),
            Expired(LiveSession),
            Absent,
        }

        let found = {
            let mut registry = inner.registry.lock();
            match registry.session_for_token(&hash).map(str::to_string) {
                None => Found::Absent,
                Some(session_id) => match registry.get_mut(&session_id) {
                    None => Found::Absent,
                    Some(live) if !live.meta.is_expired_at(now, inner.config.idle_timeout()) => {
                        live.meta.touch(now);
                        Found::Live(live.meta.clone())
                    }
                    Some(_) => {
                        let expired = registry.remove(&session_id);
                        metrics().active_sessions.set(registry.len() as u64);
                        expired.map_or(Found::Absent, Found::Expired)
                    }
                },
            }
        };

        match found {
            Found::Live(meta) => {
                inner.persist(&meta).await?;
                debug!(session_id = %meta.session_id, "Session resumed");
                Ok(meta)
            }
            Found::Expired(live) => {
                inner.expire(live).await;
                Err(Error::SessionExpired)
            }
            Found::Absent => self.resume_from_store(&hash).await,
        }
    }

    async fn resume_from_store(&self, hash: &str) -> Result<SessionMetadata> {
        let inner = &self.inner;
        let mut meta = inner
            .store
            .lookup_by_token_hash(hash)
            .await
            .map_err(Error::from)?
            .ok_or(Error::SessionNotFound)?;

        let now = Utc::now();
        if meta.is_expired_at(now, inner.config.idle_timeout()) {
            meta.mark_disconnected();
            if let Err(e) = inner.persist(&meta).await {
                warn!(session_id = %meta.session_id, error = %e, "Failed to record expired session");
            }
            metrics().sessions_expired.inc();
            return Err(Error::SessionExpired);
        }

        meta.touch(now);
        inner.persist(&meta).await?;
        debug!(session_id = %meta.session_id, connected = meta.connected, "Session resumed from store");
        Ok(meta)
    }

    /// Write raw bytes to a session's terminal.
    pub async fn write_stdin(&self, session_id: &str, token: &str, data: &[u8]) -> Result<()> {
        let handle = self.inner.authorize(session_id, token).await?;
        handle
            .write(data)
            .await
            .map_err(|e| terminal_error(session_id, "write", e))?;
        metrics().stdin_bytes.inc_by(data.len() as u64);
        Ok(())
    }

    /// Change a session's terminal geometry.
    pub async fn resize(&self, session_id: &str, token: &str, cols: u32, rows: u32) -> Result<()> {
        let range = MIN_TERMINAL_DIMENSION..=MAX_TERMINAL_DIMENSION;
        if !range.contains(&cols) || !range.contains(&rows) {
            return Err(Error::invalid(format!(
                "cols and rows must be within {}-{}",
                MIN_TERMINAL_DIMENSION, MAX_TERMINAL_DIMENSION
            )));
        }

        let handle = self.inner.authorize(session_id, token).await?;
        // Both fit: the upper bound is below u16::MAX.
        handle
            .resize(cols as u16, rows as u16)
            .await
            .map_err(|e| terminal_error(session_id, "resize", e))
    }

    /// Close a session. Process teardown errors are logged, not returned.
    pub async fn close(&self, session_id: &str, token: &str) -> Result<()> {
        let inner = &self.inner;
        inner.authorize(session_id, token).await?;

        match inner.take(session_id) {
            Some(live) => {
                let meta = inner.teardown(live, Ending::Closed).await;
                metrics().sessions_closed.inc();
                info!(session_id = %session_id, "Session closed");
                meta.map(|_| ())
            }
            // Lost a race with the watcher or another close.
            None => Err(Error::SessionNotFound),
        }
    }

    /// Close every live session. New opens are refused afterwards.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.root.cancel();

        let sessions = {
            let mut registry = inner.registry.lock();
            let drained = registry.drain();
            metrics().active_sessions.set(0);
            drained
        };
        if sessions.is_empty() {
            return;
        }

        info!(count = sessions.len(), "Closing live sessions");
        let tasks: Vec<_> = sessions
            .into_iter()
            .map(|live| {
                let inner = Arc::clone(inner);
                tokio::spawn(async move {
                    let _ = inner.teardown(live, Ending::Disconnected).await;
                })
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session teardown task failed");
            }
        }
    }

    /// Mark persisted sessions as disconnected after a restart.
    ///
    /// No process survives a restart, so any record still claiming to be
    /// connected is stale. Returns how many records were corrected.
    pub async fn recover(&self) -> Result<usize> {
        let inner = &self.inner;
        let records = inner.store.load_all().await.map_err(Error::from)?;

        let mut corrected = 0;
        for mut meta in records.into_iter().filter(|m| m.connected) {
            meta.connected = false;
            inner.persist(&meta).await?;
            corrected += 1;
        }

        if corrected > 0 {
            info!(count = corrected, "Marked stale sessions disconnected");
        }
        Ok(corrected)
    }

    /// One supervisory task per session, converging state on process exit.
    fn spawn_watcher(&self, session_id: String, handle: Arc<dyn ProcessHandle>) {
        let inner = Arc::clone(&self.inner);
        let done = handle.done();
        tokio::spawn(async move {
            let exit = done.wait().await;
            let Some(mut live) = inner.take(&session_id) else {
                return;
            };
            live.cancel.cancel();
            metrics().sessions_exited.inc();
            info!(session_id = %session_id, ?exit, "Session process exited");

            live.meta.mark_disconnected();
            if let Err(e) = inner.persist(&live.meta).await {
                warn!(session_id = %session_id, error = %e, "Failed to persist exited session");
            }
        });
    }
}

impl Inner {
    /// Check that `token` owns `session_id` and the session is still valid.
    async fn authorize(&self, session_id: &str, token: &str) -> Result<Arc<dyn ProcessHandle>> {
        if !is_valid_session_id(session_id) {
            return Err(Error::SessionNotFound);
        }
        let hash = self.hasher.hash(token);
        let now = Utc::now();

        let expired = {
            let mut registry = self.registry.lock();
            match registry.resolve(session_id, &hash) {
                TokenMatch::Unknown => return Err(Error::SessionNotFound),
                TokenMatch::Mismatch => return Err(Error::Unauthorized),
                TokenMatch::Owner => {}
            }
            let Some(live) = registry.get_mut(session_id) else {
                return Err(Error::SessionNotFound);
            };
            if !live.meta.is_expired_at(now, self.config.idle_timeout()) {
                live.meta.touch(now);
                return Ok(Arc::clone(&live.handle));
            }
            let expired = registry.remove(session_id);
            metrics().active_sessions.set(registry.len() as u64);
            expired
        };

        if let Some(live) = expired {
            self.expire(live).await;
        }
        Err(Error::SessionExpired)
    }

    /// Remove a session from both maps.
    fn take(&self, session_id: &str) -> Option<LiveSession> {
        let mut registry = self.registry.lock();
        let live = registry.remove(session_id);
        metrics().active_sessions.set(registry.len() as u64);
        live
    }

    async fn expire(&self, live: LiveSession) {
        info!(session_id = %live.meta.session_id, "Session expired");
        metrics().sessions_expired.inc();
        let _ = self.teardown(live, Ending::Disconnected).await;
    }

    /// Stop the process and persist the resulting state.
    ///
    /// The process close is best-effort; the persisted outcome is returned.
    async fn teardown(&self, mut live: LiveSession, ending: Ending) -> Result<SessionMetadata> {
        live.cancel.cancel();
        if let Err(e) = live.handle.close().await {
            warn!(session_id = %live.meta.session_id, error = %e, "Process close failed");
        }

        match ending {
            Ending::Closed => live.meta.mark_closed(),
            Ending::Disconnected => live.meta.mark_disconnected(),
        }
        if let Err(e) = self.persist(&live.meta).await {
            warn!(session_id = %live.meta.session_id, ?ending, error = %e, "Failed to persist torn down session");
            return Err(e);
        }
        Ok(live.meta)
    }

    /// Write through to the store, tracking store health.
    async fn persist(&self, meta: &SessionMetadata) -> Result<()> {
        match self.store.upsert(meta).await {
            Ok(()) => {
                health().store.set_healthy();
                Ok(())
            }
            Err(e) => {
                metrics().persistence_failures.inc();
                health().store.set_unhealthy(e.to_string());
                Err(Error::from(e))
            }
        }
    }
}

/// How a torn-down session is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    /// Explicit close: the resume token stops resolving.
    Closed,
    /// Exit, expiry or shutdown: the record stays resumable from the store.
    Disconnected,
}

/// A terminal that refuses I/O has a dead or closing process behind it.
fn terminal_error(session_id: &str, op: &'static str, err: io::Error) -> Error {
    debug!(session_id = %session_id, op, error = %err, "Terminal operation failed");
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => Error::SessionNotFound,
        _ => Error::internal(format!("terminal {} failed: {}", op, err)),
    }
}
