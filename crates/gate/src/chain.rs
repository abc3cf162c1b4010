//! Ordered middleware chain around an interactive handler.
//!
//! Each stage either calls [`Next::run`] or ends the connection by writing
//! a message and returning. Nothing reaches the handler without passing
//! every stage in order.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Longest accepted input line.
pub const MAX_LINE_BYTES: usize = 4096;

/// Session-scoped key/value storage visible to every stage and the handler.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    values: HashMap<String, Value>,
}

impl SessionContext {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// One inbound interactive connection.
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    /// Identity string announced by the client.
    pub identity: String,
    pub context: SessionContext,
    reader: Reader,
    writer: Writer,
    idle_timeout: Option<Duration>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        peer: SocketAddr,
        identity: impl Into<String>,
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            identity: identity.into(),
            context: SessionContext::default(),
            reader: Box::new(reader),
            writer: Box::new(writer),
            idle_timeout: None,
        }
    }

    /// Fail reads that wait longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Write `msg` followed by CRLF.
    pub async fn send_line(&mut self, msg: &str) -> io::Result<()> {
        self.writer.write_all(msg.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        self.writer.flush().await
    }

    /// Read one line without its terminator. `None` on end of stream.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let idle_timeout = self.idle_timeout;
        let reader = &mut self.reader;
        let mut line = String::new();
        let read = async {
            let n = reader
                .take(MAX_LINE_BYTES as u64)
                .read_line(&mut line)
                .await?;
            Ok::<usize, io::Error>(n)
        };

        let n = match idle_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))??,
            None => read.await?,
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// The interactive entry point at the end of the chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, conn: &mut Connection) -> anyhow::Result<()>;
}

/// One gating stage.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, conn: &mut Connection, next: Next<'_>) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: Middleware + ?Sized> Middleware for Arc<T> {
    async fn call(&self, conn: &mut Connection, next: Next<'_>) -> anyhow::Result<()> {
        (**self).call(conn, next).await
    }
}

/// The remainder of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub async fn run(self, conn: &mut Connection) -> anyhow::Result<()> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    handler: self.handler,
                };
                stage.call(conn, next).await
            }
            None => self.handler.handle(conn).await,
        }
    }
}

/// Stages in evaluation order plus the handler.
#[derive(Clone)]
pub struct Chain {
    stages: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Handler>,
}

impl Chain {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self {
            stages: Vec::new(),
            handler,
        }
    }

    /// Append a stage; stages run in the order they are added.
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(&self, conn: &mut Connection) -> anyhow::Result<()> {
        Next {
            stages: &self.stages,
            handler: self.handler.as_ref(),
        }
        .run(conn)
        .await
    }
}
