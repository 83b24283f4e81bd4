//! Core module containing the identifiers, wire protocol, errors and the auth
//! seam shared by the registries, the hub and the exposures

pub mod auth;
pub mod error;
pub mod ids;
pub mod protocol;

pub use auth::{InsecureTokenVerifier, StaticTokenVerifier, TokenVerifier};
pub use error::{ApiError, AuthError, DeliveryError, ProtocolError};
pub use ids::{ConnectionId, RoomId, UserId};
pub use protocol::{ClientMessage, ServerMessage};
