//! Pseudo-terminal-backed SSH subprocess launcher.
//!
//! The session service only sees the [`Launcher`] and [`ProcessHandle`]
//! capabilities; [`PtyLauncher`] is the production implementation.

pub mod command;
pub mod config;
pub mod exit;
pub mod pty;

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_core::SessionMetadata;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use command::{build_ssh_command, SshCommand};
pub use config::{HostKeyPolicy, LauncherConfig};
pub use exit::{ExitNotifier, ExitSignal, ProcessExit};
pub use pty::PtyLauncher;

/// One live subprocess attached to a pseudo-terminal.
///
/// Owned exclusively by the session that launched it.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Write raw bytes to the terminal input.
    async fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Change the terminal geometry.
    async fn resize(&self, cols: u16, rows: u16) -> io::Result<()>;

    /// Terminate the process.
    ///
    /// Idempotent: only the first call signals; later calls return `Ok(())`.
    /// Escalates to a forceful kill if the process outlives the grace window.
    async fn close(&self) -> io::Result<()>;

    /// Fires exactly once with the process's exit outcome.
    fn done(&self) -> ExitSignal;
}

/// Starts subprocesses for sessions.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch an interactive SSH session for `metadata`'s target and limits.
    ///
    /// `env` has already been validated against the allow-list. Cancelling
    /// `cancel` aborts a launch in flight. Errors are raw OS errors; the
    /// caller classifies them.
    async fn launch(
        &self,
        cancel: &CancellationToken,
        metadata: &SessionMetadata,
        env: &BTreeMap<String, String>,
    ) -> io::Result<Arc<dyn ProcessHandle>>;
}

/// Force `close()` once `limit` elapses, unless the process exits first.
pub fn enforce_max_duration(
    handle: Arc<dyn ProcessHandle>,
    limit: Duration,
) -> tokio::task::JoinHandle<()> {
    let done = handle.done();
    tokio::spawn(async move {
        tokio::select! {
            _ = done.wait() => {}
            _ = tokio::time::sleep(limit) => {
                info!(pid = ?handle.pid(), limit_secs = limit.as_secs(), "Max session duration reached");
                if let Err(e) = handle.close().await {
                    warn!(error = %e, "Failed to close process after max duration");
                }
            }
        }
    })
}
