//! HTTP and WebSocket server
//!
//! `ServerBuilder` assembles a `ServerHost` (hub + token verifier) and
//! exposes it over:
//! - WebSocket: `/ws`
//! - REST: health checks, stats and push-to-user

pub mod builder;
pub mod exposure;
pub mod host;

pub use builder::ServerBuilder;
pub use exposure::{RestExposure, WebSocketExposure};
pub use host::ServerHost;
