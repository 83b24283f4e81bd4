//! ServerBuilder for fluent API to build the collaboration server

use super::exposure::{RestExposure, WebSocketExposure};
use super::host::ServerHost;
use crate::config::ServerConfig;
use crate::core::TokenVerifier;
use crate::hub::spawn_reaper;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builder for the HTTP + WebSocket server
///
/// # Example
///
/// ```ignore
/// ServerBuilder::new()
///     .with_config(ServerConfig::from_yaml_file("roomcast.yaml")?)
///     .serve("0.0.0.0:8000")
///     .await?;
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    verifier: Option<Arc<dyn TokenVerifier>>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    /// Create a new ServerBuilder with the default configuration
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            verifier: None,
            custom_routes: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom token verifier instead of the one described by `auth`
    pub fn with_verifier(mut self, verifier: impl TokenVerifier + 'static) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    /// Add custom routes to the server
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the transport-agnostic host
    pub fn build_host(&mut self) -> ServerHost {
        let verifier = self
            .verifier
            .take()
            .unwrap_or_else(|| self.config.auth.build_verifier());
        ServerHost::new(self.config.hub.clone(), verifier)
            .with_service_token(self.config.auth.service_token.clone())
    }

    /// Build the router together with the host it serves
    ///
    /// The host gives access to the hub, which `serve` needs for the reaper
    /// and for shutdown.
    pub fn build_with_host(mut self) -> Result<(Router, Arc<ServerHost>)> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let host = Arc::new(self.build_host());

        let mut app = RestExposure::build_router(host.clone())?
            .merge(WebSocketExposure::build_router(host.clone())?);

        for custom_router in custom_routes {
            app = app.merge(custom_router);
        }

        let app = app.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

        Ok((app, host))
    }

    /// Build the final router
    pub fn build(self) -> Result<Router> {
        let (app, _host) = self.build_with_host()?;
        Ok(app)
    }

    /// Serve the application with graceful shutdown
    ///
    /// This will:
    /// - Bind to the provided address
    /// - Start the idle-connection reaper
    /// - On SIGTERM or Ctrl+C, close every connection with 1001 and stop
    pub async fn serve(self, addr: &str) -> Result<()> {
        let (app, host) = self.build_with_host()?;
        let listener = TcpListener::bind(addr).await?;

        let reaper = spawn_reaper(host.hub.clone());

        tracing::info!("Server listening on {}", addr);

        let hub = host.hub.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                hub.shutdown().await;
            })
            .await?;

        reaper.abort();
        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthMode;
    use crate::core::{InsecureTokenVerifier, StaticTokenVerifier, UserId};
    use axum::routing::get;

    #[test]
    fn test_new_uses_default_config() {
        let builder = ServerBuilder::new();
        assert_eq!(builder.config().bind_addr, "0.0.0.0:8000");
        assert!(builder.verifier.is_none());
        assert!(builder.custom_routes.is_empty());
    }

    #[tokio::test]
    async fn test_build_host_uses_configured_auth() {
        let mut config = ServerConfig::default();
        config.auth.mode = AuthMode::Insecure;
        let mut builder = ServerBuilder::new().with_config(config);

        let host = builder.build_host();
        assert_eq!(host.verifier.verify("alice").await.unwrap(), UserId::from("alice"));
    }

    #[tokio::test]
    async fn test_explicit_verifier_wins_over_config() {
        let mut config = ServerConfig::default();
        config.auth.mode = AuthMode::Insecure;
        let mut builder = ServerBuilder::new()
            .with_config(config)
            .with_verifier(StaticTokenVerifier::new().with_token("tok", "bob"));

        let host = builder.build_host();
        assert!(host.verifier.verify("alice").await.is_err());
        assert_eq!(host.verifier.verify("tok").await.unwrap(), UserId::from("bob"));
    }

    #[test]
    fn test_build_with_custom_routes() {
        let routes = Router::new().route("/custom", get(|| async { "ok" }));
        let builder = ServerBuilder::new()
            .with_verifier(InsecureTokenVerifier)
            .with_custom_routes(routes);
        assert_eq!(builder.custom_routes.len(), 1);
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_build_with_host_applies_hub_config() {
        let mut config = ServerConfig::default();
        config.hub.mailbox_capacity = 7;
        let (_app, host) = ServerBuilder::new()
            .with_config(config)
            .build_with_host()
            .unwrap();
        assert_eq!(host.hub.config().mailbox_capacity, 7);
    }
}
