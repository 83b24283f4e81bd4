//! Inbound envelope dispatch
//!
//! Turns one decoded text frame into a hub operation. Protocol errors are
//! answered with an `error` envelope to the sending connection only; they
//! never close the connection.

use crate::core::protocol::{ClientMessage, ServerMessage};
use crate::core::{ConnectionId, ProtocolError};
use crate::hub::Hub;

/// Handle one text frame from a connection
pub async fn dispatch(hub: &Hub, connection_id: &ConnectionId, text: &str) {
    let message = match ClientMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(connection_id = %connection_id, error = %e, "Rejected client message");
            hub.send_to_connection(connection_id, e.to_message()).await;
            return;
        }
    };

    tracing::debug!(
        connection_id = %connection_id,
        kind = message.kind(),
        "Received client message"
    );

    if let Err(e) = route(hub, connection_id, message).await {
        tracing::warn!(connection_id = %connection_id, error = %e, "Client message failed");
        hub.send_to_connection(connection_id, e.to_message()).await;
    }
}

async fn route(
    hub: &Hub,
    connection_id: &ConnectionId,
    message: ClientMessage,
) -> Result<(), ProtocolError> {
    match message {
        ClientMessage::CursorUpdate {
            cursor_data,
            room_id,
        } => {
            hub.broadcast_from(connection_id, room_id, |room_id, user_id, timestamp| {
                ServerMessage::CursorUpdate {
                    room_id,
                    user_id,
                    cursor_data,
                    timestamp,
                }
            })
            .await?;
        }
        ClientMessage::ArtifactUpdate {
            artifact_data,
            room_id,
        } => {
            hub.broadcast_from(connection_id, room_id, |room_id, updated_by, timestamp| {
                ServerMessage::ArtifactUpdate {
                    room_id,
                    artifact_data,
                    updated_by,
                    timestamp,
                }
            })
            .await?;
        }
        ClientMessage::JoinRoom { room_id } => match room_id {
            Some(room_id) if !room_id.as_str().is_empty() => {
                hub.join_room(connection_id, room_id).await;
            }
            _ => {
                return Err(ProtocolError::InvalidPayload {
                    kind: "join_room".to_string(),
                    message: "missing field `room_id`".to_string(),
                });
            }
        },
        ClientMessage::LeaveRoom { room_id } => {
            hub.leave_room(connection_id, room_id).await?;
        }
        ClientMessage::Ping { timestamp } => {
            hub.send_to_connection(connection_id, ServerMessage::Pong { timestamp })
                .await;
        }
        ClientMessage::Unknown { kind } => return Err(ProtocolError::UnknownType(kind)),
    }
    Ok(())
}
