//! Minimal WebSocket client helpers for following an agent's stream.

use futures_util::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::types::ServerMessage;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_MAX_MS: u64 = 30_000;

// Connect to the agent and return the WS stream
pub async fn connect(url: &str) -> anyhow::Result<WsStream> {
    let url = url::Url::parse(url)?;
    let (ws, _) = connect_async(url.as_str()).await?;
    Ok(ws)
}

/// Next decoded message. `Ok(None)` once the agent closes the stream.
/// Frames that do not decode are logged and skipped.
pub async fn next_message(ws: &mut WsStream) -> anyhow::Result<Option<ServerMessage>> {
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(json) => match serde_json::from_str::<ServerMessage>(&json) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => warn!(error = %e, "skipping undecodable frame"),
            },
            Message::Close(reason) => {
                debug!(?reason, "agent closed the stream");
                return Ok(None);
            }
            _ => {}
        }
    }
    Ok(None)
}

/// Delay before reconnect attempt `attempt` (0-based): doubles from one
/// second, capped at thirty.
pub fn backoff(attempt: u32) -> Duration {
    let ms = BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt.min(16))
        .min(BACKOFF_MAX_MS);
    Duration::from_millis(ms)
}
