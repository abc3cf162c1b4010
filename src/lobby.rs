//! Minimal interactive handler behind the transport gate.

use async_trait::async_trait;
use gate::{stages::keys, Connection, Handler};

/// Greets the caller with its resolved route and echoes lines until `exit`.
#[derive(Debug, Default)]
pub struct Lobby;

#[async_trait]
impl Handler for Lobby {
    async fn handle(&self, conn: &mut Connection) -> anyhow::Result<()> {
        let route = conn.context.get_str(keys::ROUTE).unwrap_or("lobby");
        let greeting = format!("welcome {}, you are in {}", conn.identity, route);
        conn.send_line(&greeting).await?;

        while let Some(line) = conn.read_line().await? {
            if line.trim() == "exit" {
                conn.send_line("bye").await?;
                break;
            }
            conn.send_line(&line).await?;
        }
        Ok(())
    }
}
