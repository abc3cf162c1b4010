//! Mock implementations for testing.

use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gateway_core::SessionMetadata;
use launcher::{enforce_max_duration, ExitNotifier, ExitSignal, Launcher, ProcessExit, ProcessHandle};
use metadata_store::{MemoryStore, MetadataStore, StoreError, StoreResult};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Mock terminal process that records everything sent to it.
///
/// Implements the same `ProcessHandle` trait as the pty-backed process;
/// `exit` simulates the process dying on its own.
pub struct MockProcess {
    pid: u32,
    writes: Mutex<Vec<u8>>,
    resizes: Mutex<Vec<(u16, u16)>>,
    close_calls: AtomicUsize,
    fail_close: AtomicBool,
    exited: AtomicBool,
    notifier: ExitNotifier,
    signal: ExitSignal,
}

impl MockProcess {
    pub fn new(pid: u32) -> Self {
        let (notifier, signal) = ExitSignal::channel();
        Self {
            pid,
            writes: Mutex::new(Vec::new()),
            resizes: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            fail_close: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            notifier,
            signal,
        }
    }

    /// Bytes written to the terminal so far.
    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().clone()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().clone()
    }

    /// How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Make `close` fail the way a process that survives SIGKILL does.
    pub fn set_close_failure(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Simulate the process exiting by itself.
    pub fn exit(&self, exit: ProcessExit) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            self.notifier.notify(exit);
        }
    }

    fn check_alive(&self) -> io::Result<()> {
        if self.has_exited() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "process exited"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessHandle for MockProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn write(&self, data: &[u8]) -> io::Result<()> {
        self.check_alive()?;
        self.writes.lock().extend_from_slice(data);
        Ok(())
    }

    async fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
        self.check_alive()?;
        self.resizes.lock().push((cols, rows));
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "process did not exit after kill",
            ));
        }
        self.exit(ProcessExit::Failed("signal: hangup".into()));
        Ok(())
    }

    fn done(&self) -> ExitSignal {
        self.signal.clone()
    }
}

/// One recorded `launch` call.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub metadata: SessionMetadata,
    pub env: BTreeMap<String, String>,
}

/// Mock launcher handing out `MockProcess`es.
///
/// Enforces max duration the same way the pty launcher does.
#[derive(Default)]
pub struct MockLauncher {
    launches: Mutex<Vec<LaunchRecord>>,
    processes: Mutex<Vec<Arc<MockProcess>>>,
    failure: Mutex<Option<(io::ErrorKind, String)>>,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every launch with an OS error of `kind` and `message`.
    pub fn set_failure(&self, kind: io::ErrorKind, message: impl Into<String>) {
        *self.failure.lock() = Some((kind, message.into()));
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().len()
    }

    pub fn processes(&self) -> Vec<Arc<MockProcess>> {
        self.processes.lock().clone()
    }

    /// The most recently launched process.
    pub fn last_process(&self) -> Option<Arc<MockProcess>> {
        self.processes.lock().last().cloned()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(
        &self,
        cancel: &CancellationToken,
        metadata: &SessionMetadata,
        env: &BTreeMap<String, String>,
    ) -> io::Result<Arc<dyn ProcessHandle>> {
        if cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "launch cancelled"));
        }
        if let Some((kind, message)) = self.failure.lock().clone() {
            return Err(io::Error::new(kind, message));
        }

        let process = {
            let mut processes = self.processes.lock();
            let process = Arc::new(MockProcess::new(1000 + processes.len() as u32));
            processes.push(Arc::clone(&process));
            process
        };
        self.launches.lock().push(LaunchRecord {
            metadata: metadata.clone(),
            env: env.clone(),
        });

        if let Some(limit) = metadata.limits.max_duration() {
            enforce_max_duration(process.clone(), limit);
        }
        Ok(process)
    }
}

/// Memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_upserts: AtomicBool,
    upsert_attempts: AtomicUsize,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn upsert_attempts(&self) -> usize {
        self.upsert_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for FailingStore {
    async fn upsert(&self, meta: &SessionMetadata) -> StoreResult<()> {
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock store failure".into()));
        }
        self.inner.upsert(meta).await
    }

    async fn lookup(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>> {
        self.inner.lookup(session_id).await
    }

    async fn lookup_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<SessionMetadata>> {
        self.inner.lookup_by_token_hash(token_hash).await
    }

    async fn load_all(&self) -> StoreResult<Vec<SessionMetadata>> {
        self.inner.load_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_process_close_is_idempotent() {
        let process = MockProcess::new(1);
        process.close().await.unwrap();
        process.close().await.unwrap();

        assert_eq!(process.close_calls(), 2);
        assert!(process.done().try_get().is_some());
        assert!(process.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_failing_store_toggles() {
        let store = FailingStore::new();
        store.set_should_fail(true);
        assert_eq!(store.load_all().await.unwrap().len(), 0);
        assert_eq!(store.upsert_attempts(), 0);
    }
}
