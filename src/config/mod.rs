//! Configuration loading and management
//!
//! Every field has a default, so an empty YAML document (or no file at all)
//! yields a working development configuration.
//!
//! ```yaml
//! bind_addr: "0.0.0.0:8000"
//! hub:
//!   idle_timeout_secs: 300
//!   sweep_interval_secs: 60
//!   mailbox_capacity: 50
//!   max_offline_queues: 10000
//!   send_timeout_ms: 2000
//!   outbound_buffer: 256
//! auth:
//!   mode: static
//!   service_token: push-secret
//!   tokens:
//!     secret-token-a: alice
//!     secret-token-b: bob
//! ```

use crate::core::{InsecureTokenVerifier, StaticTokenVerifier, TokenVerifier};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable that overrides `bind_addr`
pub const BIND_ADDR_ENV: &str = "ROOMCAST_BIND_ADDR";

/// Upper bound of a connection's outbound queue
pub const MAX_OUTBOUND_BUFFER: usize = 65_536;

/// Tunables of the connection and room core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// A connection idle for longer than this is evicted by the reaper
    pub idle_timeout_secs: u64,

    /// Time between two reaper sweeps
    pub sweep_interval_secs: u64,

    /// Maximum number of queued messages per offline user
    pub mailbox_capacity: usize,

    /// Maximum number of users holding an offline queue
    pub max_offline_queues: usize,

    /// How long a broadcast waits on a full outbound queue before pruning it
    pub send_timeout_ms: u64,

    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
            mailbox_capacity: 50,
            max_offline_queues: 10_000,
            send_timeout_ms: 2000,
            outbound_buffer: 256,
        }
    }
}

impl HubConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Outbound queue capacity actually used
    ///
    /// Large enough to hold the welcome frame plus a full mailbox flush, which
    /// are pushed without waiting while the registries are locked.
    pub fn effective_outbound_buffer(&self) -> usize {
        self.outbound_buffer
            .max(self.mailbox_capacity.saturating_add(2))
            .clamp(1, MAX_OUTBOUND_BUFFER)
    }

    /// Reject values the hub cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.outbound_buffer > MAX_OUTBOUND_BUFFER {
            bail!(
                "hub.outbound_buffer must be at most {}, got {}",
                MAX_OUTBOUND_BUFFER,
                self.outbound_buffer
            );
        }
        if self.mailbox_capacity > MAX_OUTBOUND_BUFFER - 2 {
            bail!(
                "hub.mailbox_capacity must be at most {}, got {}",
                MAX_OUTBOUND_BUFFER - 2,
                self.mailbox_capacity
            );
        }
        if self.send_timeout_ms == 0 {
            bail!("hub.send_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

/// How upgrade tokens are resolved to users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Tokens are looked up in `auth.tokens`
    #[default]
    Static,
    /// The token is taken as the user id (development only)
    Insecure,
}

/// Auth collaborator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// token -> user id
    pub tokens: HashMap<String, String>,

    /// Bearer token required by `POST /users/{user_id}/notify`; the
    /// endpoint refuses every request when unset
    pub service_token: Option<String>,
}

impl AuthConfig {
    /// Build the verifier described by this configuration
    pub fn build_verifier(&self) -> Arc<dyn TokenVerifier> {
        match self.mode {
            AuthMode::Static => Arc::new(StaticTokenVerifier::from_map(self.tokens.clone())),
            AuthMode::Insecure => {
                tracing::warn!("Insecure auth mode enabled: tokens are accepted as user ids");
                Arc::new(InsecureTokenVerifier)
            }
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP/WebSocket listener binds to
    pub bind_addr: String,

    pub hub: HubConfig,

    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            hub: HubConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.hub.validate()?;
        Ok(config)
    }

    /// Apply environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var(BIND_ADDR_ENV)
            && !addr.trim().is_empty()
        {
            self.bind_addr = addr;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.hub.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.hub.mailbox_capacity, 50);
        assert_eq!(config.auth.mode, AuthMode::Static);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ServerConfig::from_yaml_str(
            r#"
hub:
  idle_timeout_secs: 10
auth:
  mode: insecure
"#,
        )
        .unwrap();

        assert_eq!(config.hub.idle_timeout_secs, 10);
        assert_eq!(config.hub.sweep_interval_secs, 60);
        assert_eq!(config.auth.mode, AuthMode::Insecure);
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = ServerConfig::from_yaml_str("").unwrap();
        assert_eq!(config.hub.outbound_buffer, 256);
    }

    #[test]
    fn test_yaml_serialization() {
        let mut config = ServerConfig::default();
        config
            .auth
            .tokens
            .insert("tok".to_string(), "alice".to_string());
        let yaml = serde_yaml::to_string(&config).unwrap();

        let parsed = ServerConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.auth.tokens.get("tok").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_effective_outbound_buffer_fits_mailbox_flush() {
        let hub = HubConfig {
            outbound_buffer: 4,
            mailbox_capacity: 50,
            ..Default::default()
        };
        assert_eq!(hub.effective_outbound_buffer(), 52);
    }

    #[test]
    fn test_effective_outbound_buffer_never_overflows() {
        let hub = HubConfig {
            mailbox_capacity: usize::MAX,
            ..Default::default()
        };
        assert_eq!(hub.effective_outbound_buffer(), MAX_OUTBOUND_BUFFER);

        let hub = HubConfig {
            outbound_buffer: 0,
            mailbox_capacity: 0,
            ..Default::default()
        };
        assert_eq!(hub.effective_outbound_buffer(), 2);
    }

    #[test]
    fn test_oversized_buffers_are_rejected_at_load() {
        let err = ServerConfig::from_yaml_str("hub:\n  mailbox_capacity: 18446744073709551615\n")
            .unwrap_err();
        assert!(err.to_string().contains("mailbox_capacity"));

        let err = ServerConfig::from_yaml_str("hub:\n  outbound_buffer: 100000000\n").unwrap_err();
        assert!(err.to_string().contains("outbound_buffer"));

        assert!(ServerConfig::from_yaml_str("hub:\n  send_timeout_ms: 0\n").is_err());
        assert!(ServerConfig::default().hub.validate().is_ok());
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let hub = HubConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(hub.sweep_interval(), Duration::from_secs(1));
    }
}
