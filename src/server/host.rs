//! Server host shared by every exposure
//!
//! The host is transport-agnostic: it carries the hub and the auth
//! collaborator, and each exposure builds its router on top of it.

use crate::config::HubConfig;
use crate::core::TokenVerifier;
use crate::hub::Hub;
use std::sync::Arc;

/// Host context containing all server state
///
/// ```rust,ignore
/// let host = Arc::new(ServerHost::new(HubConfig::default(), verifier));
///
/// let rest_app = RestExposure::build_router(host.clone())?;
/// let ws_app = WebSocketExposure::build_router(host)?;
/// ```
pub struct ServerHost {
    /// Connection, room and mailbox state
    pub hub: Arc<Hub>,

    /// Resolves upgrade tokens to user ids
    pub verifier: Arc<dyn TokenVerifier>,

    /// Bearer token accepted by the push-to-user endpoint
    pub service_token: Option<String>,
}

impl ServerHost {
    pub fn new(config: HubConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            hub: Arc::new(Hub::new(config)),
            verifier,
            service_token: None,
        }
    }

    /// Build a host around an existing hub
    pub fn with_hub(hub: Arc<Hub>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            hub,
            verifier,
            service_token: None,
        }
    }

    pub fn with_service_token(mut self, token: Option<String>) -> Self {
        self.service_token = token.filter(|t| !t.is_empty());
        self
    }

    /// Whether `token` is the configured service token
    pub fn is_service_token(&self, token: &str) -> bool {
        self.service_token.as_deref() == Some(token)
    }
}
