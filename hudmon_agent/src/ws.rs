//! HTTP routes, WebSocket upgrade and the per-connection pump between a
//! hub session and its socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::state::AppState;

// A viewer that cannot take a frame in this long is treated as gone.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

const INDEX_HTML: &str = include_str!("../assets/index.html");

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if let Some(expected) = state.auth_token.as_ref() {
        match q.get("token") {
            Some(t) if t == expected => {}
            _ => return StatusCode::UNAUTHORIZED.into_response(),
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let mut session = match state.hub.on_connect() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "could not prepare backlog; refusing viewer");
            return;
        }
    };
    let id = session.id();
    let (mut sink, mut stream) = socket.split();

    let pump = async {
        // Ends when the hub drops the session or the peer stops accepting frames.
        while let Some(frame) = session.recv().await {
            match tokio::time::timeout(SEND_TIMEOUT, sink.send(Message::Text(frame.to_string())))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(session = id, error = %e, "send failed");
                    return;
                }
                Err(_) => {
                    warn!(session = id, "send timed out");
                    return;
                }
            }
        }
        let _ = sink.close().await;
    };

    // Viewers don't send anything meaningful; read only to notice the close.
    let drain = async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    };

    tokio::select! {
        _ = pump => {}
        _ = drain => {}
    }
    // dropping `session` unregisters it from the hub
}
