//! Typed error handling for roomcast
//!
//! # Error Categories
//!
//! - [`AuthError`]: the token could not be resolved to a user; the connection
//!   is refused before it is ever registered
//! - [`ProtocolError`]: malformed or unusable inbound envelope; answered with
//!   an `error` envelope, the connection stays open
//! - [`DeliveryError`]: a send to one peer failed; that peer is pruned and the
//!   broadcast carries on
//! - [`ApiError`]: errors surfaced by the REST exposure
//!
//! Transport termination (close frame, read error) is not an error value: it
//! simply ends the connection's read loop and runs the disconnect path.

use super::ids::RoomId;
use super::protocol::ServerMessage;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Errors from the auth collaborator
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was supplied on the upgrade request
    #[error("Missing authentication token")]
    MissingToken,

    /// The token did not resolve to a user
    #[error("Invalid authentication token")]
    InvalidToken,

    /// The verifier itself failed
    #[error("Authentication backend error: {0}")]
    Backend(String),
}

/// Recoverable errors in an inbound envelope
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON
    #[error("Invalid JSON format: {0}")]
    InvalidJson(String),

    /// The frame has no string `type` field
    #[error("Message is missing a string 'type' field")]
    MissingType,

    /// The `type` is not one the router understands
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Known type, wrong field shapes
    #[error("Invalid '{kind}' message: {message}")]
    InvalidPayload { kind: String, message: String },

    /// The operation needs a room the sender is not in
    #[error("{}", not_in_room_message(.requested))]
    NotInRoom { requested: Option<RoomId> },
}

fn not_in_room_message(requested: &Option<RoomId>) -> String {
    match requested {
        Some(room_id) => format!("Not a member of room '{}'", room_id),
        None => "Not in a room; send join_room first".to_string(),
    }
}

impl ProtocolError {
    /// Stable code for programmatic handling by clients
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidJson(_) => "INVALID_JSON",
            ProtocolError::MissingType => "MISSING_TYPE",
            ProtocolError::UnknownType(_) => "UNKNOWN_MESSAGE_TYPE",
            ProtocolError::InvalidPayload { .. } => "INVALID_PAYLOAD",
            ProtocolError::NotInRoom { .. } => "NOT_IN_ROOM",
        }
    }

    /// Convert to the `error` envelope sent back to the client
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.error_code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Failure to hand a message to one connection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The connection's write loop is gone
    #[error("connection closed")]
    Closed,

    /// The connection's outbound queue stayed full past the send timeout
    #[error("send timed out")]
    Timeout,
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// Errors returned by REST handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
        });
        (self.status_code(), body).into_response()
    }
}
