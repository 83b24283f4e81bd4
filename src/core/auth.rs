//! Authentication seam
//!
//! Token verification lives outside the core. The WebSocket exposure calls a
//! [`TokenVerifier`] once per upgrade request; a connection is registered only
//! when it yields a [`UserId`].

use super::error::AuthError;
use super::ids::UserId;
use async_trait::async_trait;
use std::collections::HashMap;

/// Trait for auth collaborators
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve an opaque token to the user it belongs to
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Verifier backed by a fixed token → user table (from configuration)
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<UserId>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    pub fn from_map(tokens: HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, user)| (token, UserId::new(user)))
                .collect(),
        }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Development verifier: the token *is* the user id
///
/// Never use outside local development.
pub struct InsecureTokenVerifier;

#[async_trait]
impl TokenVerifier for InsecureTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        Ok(UserId::new(token))
    }
}
