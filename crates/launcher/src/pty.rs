//! Production launcher: the SSH client on a fresh pseudo-terminal.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gateway_core::limits::{DEFAULT_COLS, DEFAULT_ROWS};
use gateway_core::SessionMetadata;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use telemetry::metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{build_ssh_command, SshCommand};
use crate::config::LauncherConfig;
use crate::exit::{ExitNotifier, ExitSignal, ProcessExit};
use crate::{enforce_max_duration, Launcher, ProcessHandle};

/// Early output kept to explain a failed startup.
const EARLY_OUTPUT_BYTES: usize = 4096;
const READ_BUF_BYTES: usize = 4096;
/// Extra wait after SIGKILL before giving up on the exit notification.
const KILL_SETTLE: Duration = Duration::from_secs(1);

type EarlyOutput = Arc<Mutex<Vec<u8>>>;
type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// Launches `ssh` under a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    config: Arc<LauncherConfig>,
}

impl PtyLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }
}

/// Everything produced by a successful spawn, before it is wrapped.
struct Spawned {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

fn to_io(err: anyhow::Error) -> io::Error {
    match err.downcast::<io::Error>() {
        Ok(io_err) => io_err,
        Err(other) => io::Error::other(other.to_string()),
    }
}

fn spawn_on_pty(command: &SshCommand) -> io::Result<Spawned> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(to_io)?;

    let mut cmd = CommandBuilder::new(&command.program);
    cmd.args(&command.args);
    cmd.env_clear();
    for (key, value) in &command.env {
        cmd.env(key, value);
    }

    let child = pair.slave.spawn_command(cmd).map_err(to_io)?;
    // The child holds its own copy of the slave side.
    drop(pair.slave);

    Ok(Spawned {
        master: pair.master,
        child,
    })
}

/// Send `signal` to the process group led by `pid`.
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The child is a
    // session leader, so -pid addresses its whole process group.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pid, signal, error = %err, "Failed to signal process group");
        }
    }
}

/// Drain terminal output so the child never blocks on a full pty buffer.
fn spawn_output_drain(
    pid: Option<u32>,
    mut reader: Box<dyn Read + Send>,
    early_output: EarlyOutput,
) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-drain-{}", pid.unwrap_or_default()))
        .spawn(move || {
            let mut buf = [0u8; READ_BUF_BYTES];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        metrics().pty_output_bytes.inc_by(n as u64);
                        let mut early = early_output.lock();
                        let room = EARLY_OUTPUT_BYTES.saturating_sub(early.len());
                        early.extend_from_slice(&buf[..n.min(room)]);
                    }
                    // EIO once the child side is gone
                    Err(_) => break,
                }
            }
        })?;
    Ok(())
}

fn spawn_waiter(
    pid: Option<u32>,
    mut child: Box<dyn Child + Send + Sync>,
    notifier: ExitNotifier,
) -> io::Result<()> {
    thread::Builder::new()
        .name(format!("pty-wait-{}", pid.unwrap_or_default()))
        .spawn(move || {
            let exit = match child.wait() {
                Ok(status) if status.success() => ProcessExit::Success,
                Ok(status) => ProcessExit::Failed(format!("exit status {}", status.exit_code())),
                Err(e) => ProcessExit::Failed(format!("wait failed: {}", e)),
            };
            debug!(?pid, ?exit, "Process exited");
            notifier.notify(exit);
        })?;
    Ok(())
}

/// A running SSH client on a pseudo-terminal.
pub struct PtyProcess {
    pid: Option<u32>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: SharedWriter,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    closed: AtomicBool,
    grace: Duration,
    done: ExitSignal,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Wire up the drain and waiter threads around a freshly spawned child.
    fn start(spawned: Spawned, grace: Duration, early_output: EarlyOutput) -> io::Result<Self> {
        let Spawned { master, child } = spawned;
        let pid = child.process_id();

        let reader = master.try_clone_reader().map_err(to_io)?;
        let writer = master.take_writer().map_err(to_io)?;
        let killer = child.clone_killer();

        let (notifier, done) = ExitSignal::channel();
        spawn_output_drain(pid, reader, early_output)?;
        spawn_waiter(pid, child, notifier)?;

        Ok(Self {
            pid,
            master: Mutex::new(master),
            writer: Arc::new(Mutex::new(Some(writer))),
            killer: Mutex::new(killer),
            closed: AtomicBool::new(false),
            grace,
            done,
        })
    }

    fn force_kill(&self) {
        if let Some(pid) = self.pid {
            signal_group(pid, libc::SIGKILL);
        }
        if let Err(e) = self.killer.lock().kill() {
            debug!(pid = ?self.pid, error = %e, "Kill after grace period failed");
        }
    }
}

#[async_trait]
impl ProcessHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"));
        }
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = writer.lock();
            let w = guard
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"))?;
            w.write_all(&data)?;
            w.flush()
        })
        .await
        .map_err(io::Error::other)?
    }

    async fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed"));
        }
        self.master
            .lock()
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(to_io)
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.done.try_get().is_some() {
            release_writer(&self.writer);
            return Ok(());
        }

        // Signal before touching the writer: a stalled write holds its lock
        // until the process goes away.
        if let Some(pid) = self.pid {
            signal_group(pid, libc::SIGHUP);
        }
        if !release_writer(&self.writer) {
            debug!(pid = ?self.pid, "Write in flight, writer released when it returns");
        }

        if tokio::time::timeout(self.grace, self.done.clone().wait())
            .await
            .is_ok()
        {
            return Ok(());
        }

        warn!(pid = ?self.pid, grace_ms = self.grace.as_millis() as u64, "Process ignored hang-up, killing");
        self.force_kill();
        if tokio::time::timeout(KILL_SETTLE, self.done.clone().wait())
            .await
            .is_err()
        {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "process did not exit after kill",
            ));
        }
        Ok(())
    }

    fn done(&self) -> ExitSignal {
        self.done.clone()
    }
}

/// Drop the pty writer, sending EOF to the remote shell.
///
/// Never waits on a write in flight: if the lock is held, the writer is
/// dropped on the blocking pool once that write returns. Returns whether it
/// was released immediately.
fn release_writer(writer: &SharedWriter) -> bool {
    if let Some(mut guard) = writer.try_lock() {
        guard.take();
        return true;
    }
    let writer = Arc::clone(writer);
    tokio::task::spawn_blocking(move || {
        writer.lock().take();
    });
    false
}

/// Best-effort description of why a process died during startup.
fn startup_failure(exit: ProcessExit, early_output: &EarlyOutput) -> io::Error {
    let output = String::from_utf8_lossy(&early_output.lock()).trim().to_string();
    let detail = match exit {
        ProcessExit::Success => "session ended during startup".to_string(),
        ProcessExit::Failed(status) => status,
    };
    if output.is_empty() {
        io::Error::other(detail)
    } else {
        io::Error::other(format!("{}: {}", detail, output))
    }
}

#[async_trait]
impl Launcher for PtyLauncher {
    async fn launch(
        &self,
        cancel: &CancellationToken,
        metadata: &SessionMetadata,
        env: &BTreeMap<String, String>,
    ) -> io::Result<Arc<dyn ProcessHandle>> {
        let started = Instant::now();

        if !self.config.ssh_available() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "ssh client binary not found",
            ));
        }

        let command = build_ssh_command(&self.config, &metadata.target(), &metadata.limits, env);
        let early_output: EarlyOutput = Arc::new(Mutex::new(Vec::new()));
        let grace = self.config.close_grace();

        let drain = Arc::clone(&early_output);
        let mut spawn = tokio::task::spawn_blocking(move || {
            spawn_on_pty(&command).and_then(|spawned| PtyProcess::start(spawned, grace, drain))
        });

        let process = tokio::select! {
            result = &mut spawn => result.map_err(io::Error::other)??,
            _ = cancel.cancelled() => {
                // The spawn may still finish; reap whatever it produced.
                tokio::spawn(async move {
                    if let Ok(Ok(process)) = spawn.await {
                        if let Err(e) = process.close().await {
                            warn!(pid = ?process.pid, error = %e, "Failed to reap cancelled launch");
                        }
                    }
                });
                return Err(io::Error::new(io::ErrorKind::Interrupted, "launch cancelled"));
            }
        };
        let process = Arc::new(process);

        // A client that cannot connect or authenticate exits almost at once.
        let probe = tokio::select! {
            exit = process.done().wait() => Some(exit),
            _ = tokio::time::sleep(self.config.startup_probe()) => None,
            _ = cancel.cancelled() => {
                if let Err(e) = process.close().await {
                    warn!(pid = ?process.pid, error = %e, "Failed to close cancelled launch");
                }
                return Err(io::Error::new(io::ErrorKind::Interrupted, "launch cancelled"));
            }
        };
        if let Some(exit) = probe {
            if let Err(e) = process.close().await {
                debug!(pid = ?process.pid, error = %e, "Close after failed startup");
            }
            return Err(startup_failure(exit, &early_output));
        }

        let handle: Arc<dyn ProcessHandle> = process;
        if let Some(limit) = metadata.limits.max_duration() {
            enforce_max_duration(Arc::clone(&handle), limit);
        }

        let elapsed = started.elapsed();
        metrics().launch_latency_ms.observe(elapsed.as_millis() as u64);
        info!(
            session_id = %metadata.session_id,
            pid = ?handle.pid(),
            destination = %metadata.target().destination(),
            port = metadata.port,
            latency_ms = elapsed.as_millis() as u64,
            "Launched ssh session"
        );
        Ok(handle)
    }
}
