//! Terminal-session gateway
//!
//! Control plane for interactive shells over outbound SSH:
//! - HTTP API to open, resume, drive and close pty-backed sessions
//! - Resume tokens stored only as keyed hashes
//! - Per-client rate limiting and a gated line-oriented transport

mod config;
mod lobby;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use api::{router, AppState};
use gate::RateLimiter;
use launcher::{Launcher, LauncherConfig, PtyLauncher};
use metadata_store::{FileStore, MemoryStore, MetadataStore};
use session::SessionService;
use telemetry::{health, init_tracing_from_env, log_snapshot, metrics};

use crate::config::Config;
use crate::lobby::Lobby;

const METRICS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting ssh-gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = config::load()?;

    let store = open_store(&config).await?;
    check_launcher(&config.launcher);
    let launcher: Arc<dyn Launcher> = Arc::new(PtyLauncher::new(config.launcher.clone()));

    let sessions = SessionService::with_config(launcher, store, config.sessions.clone());
    match sessions.recover().await {
        Ok(0) => {}
        Ok(n) => info!(recovered = n, "Marked stale sessions as disconnected"),
        Err(e) => warn!(error = %e, "Failed to recover persisted sessions"),
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(report_metrics(METRICS_REPORT_INTERVAL, shutdown.clone()));

    // Interactive transport behind the gate
    let chain = Arc::new(gate::standard_chain(
        Arc::new(RateLimiter::new(config.rate_limit.clone())),
        config.transport.max_concurrent,
        config.transport.routes.clone(),
        Arc::new(Lobby),
    ));
    let transport_listener = TcpListener::bind(config.transport.bind_addr())
        .await
        .context("Failed to bind transport address")?;
    let transport = tokio::spawn(gate::serve(
        transport_listener,
        chain,
        config.transport.idle_timeout(),
        shutdown.clone(),
    ));

    // HTTP control plane
    let state = AppState::with_rate_limit(sessions.clone(), config.rate_limit.clone());
    let app = router(state);

    let addr: SocketAddr = config
        .http
        .bind_addr()
        .parse()
        .context("Invalid server address")?;
    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let http_shutdown = shutdown.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
    .await
    .context("Server error");

    info!("Shutting down...");
    shutdown.cancel();
    sessions.shutdown().await;

    match transport.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Transport error"),
        Err(e) => error!(error = %e, "Transport task panicked"),
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn MetadataStore>> {
    let store: Arc<dyn MetadataStore> = match &config.store.path {
        Some(path) => {
            info!(path = %path.display(), "Using file metadata store");
            Arc::new(
                FileStore::open(path.clone())
                    .await
                    .context("Failed to open metadata store")?,
            )
        }
        None => {
            warn!("No store path configured; session metadata will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };
    health().store.set_healthy();
    Ok(store)
}

/// Log a metrics snapshot every `period` until shutdown.
async fn report_metrics(period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    let mut previous = None;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = metrics().snapshot();
                log_snapshot(&snapshot, previous.as_ref());
                previous = Some(snapshot);
            }
        }
    }
    log_snapshot(&metrics().snapshot(), previous.as_ref());
}

/// Record whether new sessions can be launched at all.
fn check_launcher(config: &LauncherConfig) {
    if config.ssh_available() {
        health().launcher.set_healthy();
        info!(ssh = %config.ssh_path.display(), "SSH client: available");
    } else {
        health().launcher.set_unhealthy("ssh client not found");
        error!(ssh = %config.ssh_path.display(), "SSH client: missing");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
