//! WebSocket message protocol definitions
//!
//! Defines the JSON envelopes exchanged between collaboration clients and the
//! server. Every envelope is an object with a `type` tag.
//!
//! ## Client → Server Messages
//!
//! ```json
//! // Cursor moved inside the current room
//! {"type": "cursor_update", "cursor_data": {"x": 10, "y": 20}}
//!
//! // Shared artifact changed
//! {"type": "artifact_update", "artifact_data": {"nodes": []}}
//!
//! // Switch rooms
//! {"type": "join_room", "room_id": "doc-1"}
//! {"type": "leave_room"}
//!
//! // Keepalive, the token is echoed back
//! {"type": "ping", "timestamp": 1718000000}
//! ```
//!
//! The pre-rename names `wireframe_update`, `join_project` and `leave_project`
//! (with `project_id` / `wireframe_data` fields) are accepted as aliases.
//!
//! ## Server → Client Messages
//!
//! ```json
//! {"type": "connection_established", "user_id": "u1", "connection_id": "conn_…", "room_id": null, "message": "…"}
//! {"type": "cursor_update", "room_id": "doc-1", "user_id": "u1", "cursor_data": {…}, "timestamp": "…"}
//! {"type": "artifact_update", "room_id": "doc-1", "artifact_data": {…}, "updated_by": "u1", "timestamp": "…"}
//! {"type": "user_joined", "room_id": "doc-1", "user_id": "u2", "timestamp": "…"}
//! {"type": "user_left", "room_id": "doc-1", "user_id": "u2", "timestamp": "…"}
//! {"type": "room_joined", "room_id": "doc-1", "members": ["u1", "u2"]}
//! {"type": "room_left", "room_id": "doc-1"}
//! {"type": "pong", "timestamp": 1718000000}
//! {"type": "offline_message", "original_message": {…}, "stored_at": "…"}
//! {"type": "notification", "payload": {…}, "timestamp": "…"}
//! {"type": "error", "code": "UNKNOWN_MESSAGE_TYPE", "message": "…"}
//! ```

use super::error::ProtocolError;
use super::ids::{ConnectionId, RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Close code sent when the token cannot be resolved to a user
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Close code sent by the reaper to connections idle past the threshold
pub const CLOSE_IDLE_TIMEOUT: u16 = 4008;

/// Close code sent to every connection on process shutdown
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Inbound `type` tags the router understands, aliases included
const INBOUND_TYPES: &[&str] = &[
    "cursor_update",
    "artifact_update",
    "wireframe_update",
    "join_room",
    "join_project",
    "leave_room",
    "leave_project",
    "ping",
];

/// Messages sent from client to server
///
/// Decoded once at the boundary with [`ClientMessage::decode`]. Unrecognized
/// tags become [`ClientMessage::Unknown`] so the router can answer them with an
/// error envelope instead of dropping the connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Cursor moved; relayed to the other members of the sender's room
    CursorUpdate {
        #[serde(default, alias = "payload")]
        cursor_data: Value,
        #[serde(default, alias = "project_id")]
        room_id: Option<RoomId>,
    },
    /// Shared artifact changed; relayed like a cursor update
    #[serde(alias = "wireframe_update")]
    ArtifactUpdate {
        #[serde(default, alias = "payload", alias = "wireframe_data")]
        artifact_data: Value,
        #[serde(default, alias = "project_id")]
        room_id: Option<RoomId>,
    },
    /// Join a room, leaving the current one first
    #[serde(alias = "join_project")]
    JoinRoom {
        #[serde(default, alias = "project_id")]
        room_id: Option<RoomId>,
    },
    /// Leave a room (the current one when no id is given)
    #[serde(alias = "leave_project")]
    LeaveRoom {
        #[serde(default, alias = "project_id")]
        room_id: Option<RoomId>,
    },
    /// Keepalive; the optional correlation token is echoed in the pong
    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
    /// Any other tag
    #[serde(skip)]
    Unknown { kind: String },
}

impl ClientMessage {
    /// Decode a text frame into a client message
    ///
    /// Fails only for unparseable JSON, a missing/non-string `type`, or a
    /// recognized type whose fields have the wrong shape.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let kind = match value.get("type") {
            Some(Value::String(kind)) => kind.clone(),
            _ => return Err(ProtocolError::MissingType),
        };

        if !INBOUND_TYPES.contains(&kind.as_str()) {
            return Ok(ClientMessage::Unknown { kind });
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
            kind,
            message: e.to_string(),
        })
    }

    /// The canonical tag of this message (used in logs)
    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::CursorUpdate { .. } => "cursor_update",
            ClientMessage::ArtifactUpdate { .. } => "artifact_update",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::LeaveRoom { .. } => "leave_room",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::Unknown { kind } => kind,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every accepted connection
    ConnectionEstablished {
        user_id: UserId,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
        message: String,
    },
    /// Another member moved their cursor
    CursorUpdate {
        room_id: RoomId,
        user_id: UserId,
        cursor_data: Value,
        timestamp: DateTime<Utc>,
    },
    /// Another member changed the shared artifact
    ArtifactUpdate {
        room_id: RoomId,
        artifact_data: Value,
        updated_by: UserId,
        timestamp: DateTime<Utc>,
    },
    /// A user entered the room
    UserJoined {
        room_id: RoomId,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },
    /// A user left the room (explicitly or by losing their last connection)
    UserLeft {
        room_id: RoomId,
        user_id: UserId,
        timestamp: DateTime<Utc>,
    },
    /// Confirmation of a join, with the members at join time
    RoomJoined { room_id: RoomId, members: Vec<UserId> },
    /// Confirmation of a leave
    RoomLeft { room_id: RoomId },
    /// Keepalive response
    Pong { timestamp: Option<Value> },
    /// A message that was queued while the user had no live connection
    OfflineMessage {
        original_message: Box<ServerMessage>,
        stored_at: DateTime<Utc>,
    },
    /// Message pushed to a user by an external collaborator
    Notification {
        payload: Value,
        timestamp: DateTime<Utc>,
    },
    /// Error message
    Error { code: String, message: String },
}

impl ServerMessage {
    /// The `type` tag of this message (used in logs)
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ConnectionEstablished { .. } => "connection_established",
            ServerMessage::CursorUpdate { .. } => "cursor_update",
            ServerMessage::ArtifactUpdate { .. } => "artifact_update",
            ServerMessage::UserJoined { .. } => "user_joined",
            ServerMessage::UserLeft { .. } => "user_left",
            ServerMessage::RoomJoined { .. } => "room_joined",
            ServerMessage::RoomLeft { .. } => "room_left",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::OfflineMessage { .. } => "offline_message",
            ServerMessage::Notification { .. } => "notification",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_cursor_update() {
        let msg = ClientMessage::decode(r#"{"type":"cursor_update","cursor_data":{"x":10,"y":20}}"#)
            .unwrap();
        match msg {
            ClientMessage::CursorUpdate {
                cursor_data,
                room_id,
            } => {
                assert_eq!(cursor_data, json!({"x": 10, "y": 20}));
                assert!(room_id.is_none());
            }
            other => panic!("Expected CursorUpdate, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_accepts_legacy_aliases() {
        let msg = ClientMessage::decode(
            r#"{"type":"wireframe_update","wireframe_data":{"v":2},"project_id":"p1"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::ArtifactUpdate {
                artifact_data,
                room_id,
            } => {
                assert_eq!(artifact_data, json!({"v": 2}));
                assert_eq!(room_id, Some(RoomId::from("p1")));
            }
            other => panic!("Expected ArtifactUpdate, got {:?}", other),
        }

        let msg = ClientMessage::decode(r#"{"type":"join_project","project_id":"p1"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::JoinRoom { room_id: Some(ref r) } if r.as_str() == "p1"
        ));
    }

    #[test]
    fn test_decode_payload_alias() {
        let msg =
            ClientMessage::decode(r#"{"type":"cursor_update","payload":{"x":1}}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::CursorUpdate { ref cursor_data, .. } if cursor_data["x"] == 1
        ));
    }

    #[test]
    fn test_decode_join_without_room_is_not_a_decode_error() {
        // The router turns this into an error reply
        let msg = ClientMessage::decode(r#"{"type":"join_room"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::JoinRoom { room_id: None }));
    }

    #[test]
    fn test_decode_ping_keeps_correlation_token() {
        let msg = ClientMessage::decode(r#"{"type":"ping","timestamp":"abc"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Ping { timestamp: Some(ref t) } if t == "abc"
        ));
    }

    #[test]
    fn test_decode_unknown_type() {
        let msg = ClientMessage::decode(r#"{"type":"subscribe","filter":{}}"#).unwrap();
        match msg {
            ClientMessage::Unknown { kind } => assert_eq!(kind, "subscribe"),
            other => panic!("Expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = ClientMessage::decode("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_missing_type() {
        assert!(matches!(
            ClientMessage::decode(r#"{"cursor_data":{}}"#).unwrap_err(),
            ProtocolError::MissingType
        ));
        assert!(matches!(
            ClientMessage::decode(r#"{"type":42}"#).unwrap_err(),
            ProtocolError::MissingType
        ));
        assert!(matches!(
            ClientMessage::decode("[1,2,3]").unwrap_err(),
            ProtocolError::MissingType
        ));
    }

    #[test]
    fn test_decode_wrong_field_shape() {
        let err = ClientMessage::decode(r#"{"type":"join_room","room_id":{"nested":true}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref kind, .. } if kind == "join_room"));
    }

    #[test]
    fn test_server_message_cursor_update_serialization() {
        let msg = ServerMessage::CursorUpdate {
            room_id: RoomId::from("doc-1"),
            user_id: UserId::from("alice"),
            cursor_data: json!({"x": 10, "y": 20}),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "cursor_update");
        assert_eq!(json["room_id"], "doc-1");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["cursor_data"]["x"], 10);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_server_message_pong_echoes_null_when_absent() {
        let json = serde_json::to_value(ServerMessage::Pong { timestamp: None }).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json["timestamp"].is_null());
    }

    #[test]
    fn test_server_message_offline_wraps_original() {
        let original = ServerMessage::Notification {
            payload: json!({"text": "hello"}),
            timestamp: Utc::now(),
        };
        let msg = ServerMessage::OfflineMessage {
            original_message: Box::new(original.clone()),
            stored_at: Utc::now(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "offline_message");
        assert_eq!(json["original_message"]["type"], "notification");
        assert_eq!(json["original_message"]["payload"]["text"], "hello");

        let parsed: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_server_message_kind_matches_tag() {
        let msg = ServerMessage::RoomLeft {
            room_id: RoomId::from("r"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.kind());
    }
}
