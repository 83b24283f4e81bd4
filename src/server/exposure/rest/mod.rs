//! REST exposure: health, stats and push-to-user
//!
//! The REST exposure consumes a `ServerHost` and produces an Axum `Router`.

use crate::core::protocol::ServerMessage;
use crate::core::{ApiError, UserId};
use crate::hub::HubStats;
use crate::server::host::ServerHost;
use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;

/// REST API exposure implementation
pub struct RestExposure;

impl RestExposure {
    /// Build the REST router from a host
    ///
    /// Routes:
    /// - `GET /health`, `GET /healthz`
    /// - `GET /ws/stats`, `GET /stats`
    /// - `POST /users/{user_id}/notify`
    pub fn build_router(host: Arc<ServerHost>) -> Result<Router> {
        let api_routes = Router::new()
            .route("/ws/stats", get(Self::stats))
            .route("/stats", get(Self::stats))
            .route("/users/{user_id}/notify", post(Self::notify))
            .with_state(host);

        Ok(Self::health_routes().merge(api_routes))
    }

    /// Build health check routes
    fn health_routes() -> Router {
        Router::new()
            .route("/health", get(Self::health_check))
            .route("/healthz", get(Self::health_check))
    }

    async fn health_check() -> Json<Value> {
        Json(json!({
            "status": "ok",
            "service": "roomcast"
        }))
    }

    async fn stats(State(host): State<Arc<ServerHost>>) -> Json<HubStats> {
        Json(host.hub.stats().await)
    }

    /// Push a notification to every connection of a user
    ///
    /// Requires `Authorization: Bearer <auth.service_token>`. Offline users
    /// get it in their mailbox.
    async fn notify(
        State(host): State<Arc<ServerHost>>,
        Path(user_id): Path<UserId>,
        headers: HeaderMap,
        Json(payload): Json<Value>,
    ) -> Result<Json<Value>, ApiError> {
        let bearer = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match bearer {
            Some(token) if host.is_service_token(token.trim()) => {}
            _ => {
                tracing::warn!(user_id = %user_id, "Rejected unauthenticated notification");
                return Err(ApiError::Unauthorized(
                    "a valid service token is required".to_string(),
                ));
            }
        }

        if payload.is_null() {
            return Err(ApiError::BadRequest(
                "notification payload must not be null".to_string(),
            ));
        }

        let message = ServerMessage::Notification {
            payload,
            timestamp: Utc::now(),
        };
        let outcome = host.hub.send_to_user(&user_id, message).await;

        tracing::info!(
            user_id = %user_id,
            delivered = outcome.delivered,
            queued = outcome.queued,
            "Notification pushed"
        );

        Ok(Json(json!({
            "delivered": outcome.delivered,
            "queued": outcome.queued
        })))
    }
}
