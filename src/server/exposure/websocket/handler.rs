//! WebSocket upgrade handler and per-connection loops
//!
//! Each authenticated connection gets:
//!
//! 1. Registration in the hub, which queues `connection_established` (and any
//!    offline messages) on its outbound queue
//! 2. A write loop that drains the outbound queue into the socket
//! 3. A read loop that records activity and hands text frames to the router
//!
//! Whichever loop ends first ends the connection, but never in the middle of
//! handling a frame.

use super::router;
use crate::core::protocol::CLOSE_AUTH_FAILED;
use crate::core::{AuthError, ConnectionId, RoomId, UserId};
use crate::registry::Outbound;
use crate::server::host::ServerHost;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,

    /// Room to join right after connecting
    #[serde(default, alias = "project_id")]
    pub room_id: Option<RoomId>,
}

/// WebSocket upgrade handler for GET /ws
///
/// The token is verified before the upgrade completes. A rejected token still
/// upgrades, then closes with [`CLOSE_AUTH_FAILED`] so browser clients can
/// read the reason.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(host): State<Arc<ServerHost>>,
) -> impl IntoResponse {
    let verified = match params.token.as_deref() {
        None | Some("") => Err(AuthError::MissingToken),
        Some(token) => host.verifier.verify(token).await,
    };

    match verified {
        Ok(user_id) => {
            let room_id = params.room_id.filter(|room| !room.as_str().is_empty());
            ws.on_upgrade(move |socket| handle_socket(socket, host, user_id, room_id))
        }
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket authentication failed");
            ws.on_upgrade(reject_socket)
        }
    }
}

/// Close an unauthenticated socket without registering it
async fn reject_socket(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: CLOSE_AUTH_FAILED,
        reason: "Authentication failed".into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send auth close frame");
    }
}

/// Run a single authenticated connection until either side ends it
async fn handle_socket(
    socket: WebSocket,
    host: Arc<ServerHost>,
    user_id: UserId,
    room_id: Option<RoomId>,
) {
    let hub = host.hub.clone();
    let (conn_id, outbound_rx) = hub.connect(user_id, room_id).await;

    let (ws_write, mut ws_read) = socket.split();

    let mut write_handle = tokio::spawn(write_loop(
        ws_write,
        outbound_rx,
        conn_id.clone(),
        hub.config().send_timeout(),
    ));

    // Only the wait for the next frame races the write loop; a dispatch that
    // has started always runs to completion.
    loop {
        let next = tokio::select! {
            next = ws_read.next() => next,
            _ = &mut write_handle => {
                tracing::debug!(connection_id = %conn_id, "Write loop ended, closing connection");
                break;
            }
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %conn_id, error = %e, "WebSocket read error");
                break;
            }
            None => break,
        };

        hub.touch(&conn_id).await;

        match message {
            Message::Text(text) => {
                router::dispatch(&hub, &conn_id, text.as_str()).await;
            }
            Message::Close(_) => {
                tracing::debug!(connection_id = %conn_id, "Client sent close frame");
                break;
            }
            // axum answers pings itself; binary frames are not part of the protocol
            _ => {}
        }
    }

    // Cleanup
    write_handle.abort();
    hub.disconnect(&conn_id).await;
}

/// Forward the outbound queue to the socket
///
/// Ends when the queue is closed (the connection left the hub), after a close
/// frame, or when a write fails or exceeds `write_timeout`.
async fn write_loop(
    mut ws_write: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    conn_id: ConnectionId,
    write_timeout: Duration,
) {
    while let Some(outbound) = outbound_rx.recv().await {
        let (frame, closing) = match outbound {
            Outbound::Message(message) => match serde_json::to_string(&message) {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::error!(
                        connection_id = %conn_id,
                        error = %e,
                        "Failed to serialize ServerMessage"
                    );
                    continue;
                }
            },
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        match tokio::time::timeout(write_timeout, ws_write.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %conn_id, error = %e, "WebSocket write failed, closing");
                break;
            }
            Err(_) => {
                tracing::warn!(connection_id = %conn_id, "WebSocket write timed out, closing");
                break;
            }
        }

        if closing {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_params_accept_project_alias() {
        let params: ConnectParams =
            serde_json::from_value(serde_json::json!({"token": "t", "project_id": "doc-1"}))
                .unwrap();
        assert_eq!(params.token.as_deref(), Some("t"));
        assert_eq!(params.room_id, Some(RoomId::from("doc-1")));
    }

    #[test]
    fn test_connect_params_default_to_none() {
        let params: ConnectParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(params.token.is_none());
        assert!(params.room_id.is_none());
    }
}
