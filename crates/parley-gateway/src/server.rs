// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post, put},
};
use parley_campaign::CampaignExecutor;
use parley_core::ParleyError;
use parley_engine::Engine;
use parley_webhook::{Subscriptions, WebhookDispatcher};
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;
use crate::{sse, ws};

/// Requests served concurrently before new ones queue.
const MAX_IN_FLIGHT: usize = 512;

/// Room for JSON framing and non-media fields around an encoded upload.
const BODY_SLACK: usize = 64 * 1024;

/// Request body cap: the inline media limit after base64 expansion, plus slack.
pub fn body_limit(max_inline_bytes: usize) -> usize {
    max_inline_bytes.div_ceil(3).saturating_mul(4).saturating_add(BODY_SLACK)
}

/// Health state for unauthenticated health/metrics endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Prometheus render function; `None` when metrics are disabled.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

impl HealthState {
    pub fn new(prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>) -> Self {
        Self {
            start_time: std::time::Instant::now(),
            prometheus_render,
        }
    }
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub engine: Engine,
    pub campaigns: CampaignExecutor,
    pub subscriptions: Subscriptions,
    pub webhooks: WebhookDispatcher,
    pub auth: AuthConfig,
    pub health: HealthState,
}

/// Where the gateway listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl From<&parley_config::model::ServerConfig> for ServerConfig {
    fn from(config: &parley_config::model::ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
        }
    }
}

/// Build the full route table.
///
/// Public: `/health`, `/metrics`, and provider callbacks under `/webhooks`.
/// Everything else requires the bearer token.
pub fn router(state: GatewayState) -> Router {
    let auth_state = state.auth.clone();
    let max_body = body_limit(state.engine.pipeline.max_inline_bytes());

    let public_routes = Router::new()
        .route("/health", get(handlers::health::get_public_health))
        .route("/metrics", get(handlers::health::get_public_metrics))
        .route(
            "/webhooks/{channel_id}",
            get(handlers::inbound::verify_subscription).post(handlers::inbound::post_inbound),
        )
        .with_state(state.clone());

    let api_routes = Router::new()
        .route("/v1/messages", post(handlers::messages::post_message))
        .route("/v1/messages/{id}", get(handlers::messages::get_message))
        .route(
            "/v1/messages/{id}/resend",
            post(handlers::messages::resend_message),
        )
        .route(
            "/v1/conversations",
            get(handlers::conversations::list_conversations)
                .post(handlers::conversations::start_conversation),
        )
        .route(
            "/v1/conversations/{id}",
            get(handlers::conversations::get_conversation),
        )
        .route(
            "/v1/conversations/{id}/messages",
            get(handlers::conversations::list_messages),
        )
        .route(
            "/v1/conversations/{id}/read",
            post(handlers::conversations::mark_read),
        )
        .route(
            "/v1/conversations/{id}/assign",
            put(handlers::conversations::assign),
        )
        .route(
            "/v1/conversations/{id}/status",
            put(handlers::conversations::set_status),
        )
        .route(
            "/v1/conversations/{id}/priority",
            put(handlers::conversations::set_priority),
        )
        .route("/v1/contacts/{id}", get(handlers::conversations::get_contact))
        .route(
            "/v1/campaigns",
            get(handlers::campaigns::list_campaigns).post(handlers::campaigns::create_campaign),
        )
        .route("/v1/campaigns/{id}", get(handlers::campaigns::get_campaign))
        .route(
            "/v1/campaigns/{id}/recipients",
            get(handlers::campaigns::list_recipients).post(handlers::campaigns::add_recipients),
        )
        .route(
            "/v1/campaigns/{id}/execute",
            post(handlers::campaigns::execute_campaign),
        )
        .route(
            "/v1/campaigns/{id}/schedule",
            post(handlers::campaigns::schedule_campaign),
        )
        .route(
            "/v1/campaigns/{id}/cancel",
            post(handlers::campaigns::cancel_campaign),
        )
        .route(
            "/v1/webhooks",
            get(handlers::webhooks::list_webhooks).post(handlers::webhooks::create_webhook),
        )
        .route(
            "/v1/webhooks/{id}",
            get(handlers::webhooks::get_webhook)
                .patch(handlers::webhooks::update_webhook)
                .delete(handlers::webhooks::delete_webhook),
        )
        .route(
            "/v1/webhooks/{id}/executions",
            get(handlers::webhooks::list_executions),
        )
        .route("/v1/webhooks/{id}/test", post(handlers::webhooks::test_webhook))
        .route("/v1/channels", get(handlers::channels::list_channels))
        .route(
            "/v1/channels/{id}/reset",
            post(handlers::channels::reset_channel),
        )
        .route("/media/{message_id}", get(handlers::media::get_media))
        .route("/v1/live", get(ws::ws_handler))
        .route("/v1/live/events", get(sse::live_events))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the gateway until `cancel` fires.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), ParleyError> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| ParleyError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limit_covers_encoded_media() {
        assert_eq!(body_limit(3), 4 + BODY_SLACK);
        assert_eq!(body_limit(4), 8 + BODY_SLACK);
        let limit = body_limit(16 * 1024 * 1024);
        assert!(limit > 16 * 1024 * 1024 * 4 / 3);
        assert_eq!(body_limit(usize::MAX), usize::MAX);
    }

    #[test]
    fn server_config_from_model() {
        let model = parley_config::model::ServerConfig::default();
        let config = ServerConfig::from(&model);
        assert_eq!(config.host, model.host);
        assert_eq!(config.port, model.port);
    }
}
