//! WebSocket exposure: the collaboration channel
//!
//! # Architecture
//!
//! ```text
//! Client ──ws──▶ /ws?token=… ──▶ ws_handler() ──▶ TokenVerifier
//!                                     │
//!                              Hub::connect()
//!                                     │
//!            read loop ──▶ router::dispatch() ──▶ Hub ──▶ outbound queues
//!                                                              │
//!            write loop ◀──────────────────────────────────────┘
//! ```
//!
//! The envelope format is described in [`crate::core::protocol`].

mod handler;
pub mod router;

use crate::server::host::ServerHost;
use anyhow::Result;
use axum::{Router, routing::get};
use std::sync::Arc;

pub use handler::ConnectParams;

/// WebSocket API exposure implementation
///
/// Produces an Axum router with the `/ws` upgrade endpoint.
pub struct WebSocketExposure;

impl WebSocketExposure {
    /// Build the WebSocket router from a host
    pub fn build_router(host: Arc<ServerHost>) -> Result<Router> {
        let router = Router::new()
            .route("/ws", get(handler::ws_handler))
            .with_state(host);

        Ok(router)
    }
}
