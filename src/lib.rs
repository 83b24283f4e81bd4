//! # roomcast
//!
//! Real-time connection and room-broadcast core for collaborative document
//! editing.
//!
//! ## Features
//!
//! - **Authenticated WebSocket connections**: a pluggable [`TokenVerifier`](core::TokenVerifier)
//!   resolves the upgrade token to a user
//! - **Multi-device presence**: a user stays online while any of their connections is open
//! - **Rooms**: one room per user; cursor and artifact updates are relayed to
//!   the other members
//! - **Offline mailbox**: messages for offline users are kept (latest 50) and
//!   replayed on reconnect
//! - **Reaper**: idle connections are closed and cleaned up periodically
//! - **Stats**: connection, user, room and mailbox counters over REST
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use roomcast::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_yaml_file("roomcast.yaml")?;
//!     let addr = config.bind_addr.clone();
//!
//!     ServerBuilder::new().with_config(config).serve(&addr).await
//! }
//! ```

pub mod config;
pub mod core;
pub mod hub;
pub mod registry;
pub mod server;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Configuration ===
    pub use crate::config::{AuthConfig, AuthMode, HubConfig, ServerConfig};

    // === Core ===
    pub use crate::core::{
        ApiError, AuthError, ClientMessage, ConnectionId, DeliveryError, InsecureTokenVerifier,
        ProtocolError, RoomId, ServerMessage, StaticTokenVerifier, TokenVerifier, UserId,
    };

    // === Hub ===
    pub use crate::hub::{Hub, HubStats, UserDelivery, spawn_reaper};

    // === Server ===
    pub use crate::server::{RestExposure, ServerBuilder, ServerHost, WebSocketExposure};

    // === External re-exports ===
    pub use async_trait::async_trait;
    pub use chrono::{DateTime, Utc};
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
