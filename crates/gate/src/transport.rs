//! Line-oriented TCP transport in front of the chain.
//!
//! The first line a client sends is its identity. It is read by
//! [`IdentityRouter`](crate::stages::IdentityRouter), so nothing is read
//! before the rate limit and concurrency cap have admitted the connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{Chain, Connection};

/// Interactive transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Read inactivity before the connection is dropped
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Concurrent interactive connections
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Identity to route
    #[serde(default = "default_routes")]
    pub routes: HashMap<String, String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    2222
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    32
}

fn default_routes() -> HashMap<String, String> {
    HashMap::from([("guest".to_string(), "lobby".to_string())])
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_concurrent: default_max_concurrent(),
            routes: default_routes(),
        }
    }
}

impl TransportConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Accept connections until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    chain: Arc<Chain>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local = listener.local_addr().context("transport listener address")?;
    info!(addr = %local, "Interactive transport listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            },
        };

        metrics().gate_connections.inc();
        let chain = Arc::clone(&chain);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = handle_connection(stream, peer, &chain, idle_timeout) => {
                    if let Err(e) = result {
                        debug!(peer = %peer, error = %e, "Connection ended with error");
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!(peer = %peer, "Connection dropped on shutdown");
                }
            }
        });
    }

    info!("Interactive transport stopped");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    chain: &Chain,
    idle_timeout: Duration,
) -> anyhow::Result<()> {
    let (read, write) = stream.into_split();
    let mut conn = Connection::new(peer, String::new(), BufReader::new(read), write)
        .with_idle_timeout(idle_timeout);

    chain.run(&mut conn).await?;
    if let Err(e) = conn.shutdown().await {
        debug!(peer = %peer, error = %e, "Connection shutdown failed");
    }
    Ok(())
}
