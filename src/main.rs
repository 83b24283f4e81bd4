//! roomcast server binary
//!
//! Usage: `roomcast [config.yaml]`. The config path may also be given with
//! `ROOMCAST_CONFIG`; without either the built-in defaults are used.

use anyhow::{Context, Result};
use roomcast::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG_PATH_ENV: &str = "ROOMCAST_CONFIG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomcast=info,tower_http=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok());

    let config = match config_path {
        Some(path) => {
            tracing::info!(path = %path, "Loading configuration");
            ServerConfig::from_yaml_file(&path)
                .with_context(|| format!("failed to load config from {}", path))?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            ServerConfig::default()
        }
    }
    .with_env_overrides();

    let addr = config.bind_addr.clone();
    ServerBuilder::new().with_config(config).serve(&addr).await
}
