// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook subscription management.
//!
//! Secrets are write-only: responses report `hasSecret` instead.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use parley_core::types::{WebhookExecution, WebhookSubscription};
use parley_webhook::{NewSubscription, SubscriptionPatch, parse_events};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::handlers::Page;
use crate::server::GatewayState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: WebhookSubscription,
    pub has_secret: bool,
}

impl From<WebhookSubscription> for SubscriptionView {
    fn from(mut subscription: WebhookSubscription) -> Self {
        let has_secret = subscription.secret.take().is_some();
        Self {
            subscription,
            has_secret,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TestBody {
    /// Wire name such as `message.received`.
    pub event: String,
}

/// POST /v1/webhooks
pub async fn create_webhook(
    State(state): State<GatewayState>,
    body: Result<Json<NewSubscription>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubscriptionView>)> {
    let Json(body) = body?;
    let sub = state.subscriptions.create(body).await?;
    Ok((StatusCode::CREATED, Json(sub.into())))
}

/// GET /v1/webhooks
pub async fn list_webhooks(
    State(state): State<GatewayState>,
) -> ApiResult<Json<Vec<SubscriptionView>>> {
    let subs = state.subscriptions.list().await?;
    Ok(Json(subs.into_iter().map(Into::into).collect()))
}

/// GET /v1/webhooks/{id}
pub async fn get_webhook(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SubscriptionView>> {
    Ok(Json(state.subscriptions.get(&id).await?.into()))
}

/// PATCH /v1/webhooks/{id}
pub async fn update_webhook(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<SubscriptionPatch>, JsonRejection>,
) -> ApiResult<Json<SubscriptionView>> {
    let Json(body) = body?;
    Ok(Json(state.subscriptions.update(&id, body).await?.into()))
}

/// DELETE /v1/webhooks/{id}
pub async fn delete_webhook(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.subscriptions.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/webhooks/{id}/executions
pub async fn list_executions(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    page: Result<Query<Page>, QueryRejection>,
) -> ApiResult<Json<Vec<WebhookExecution>>> {
    let Query(page) = page?;
    Ok(Json(
        state
            .subscriptions
            .executions(&id, page.limit_or(50))
            .await?,
    ))
}

/// POST /v1/webhooks/{id}/test
///
/// Delivers a synthetic event right away and returns the execution record.
pub async fn test_webhook(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<TestBody>, JsonRejection>,
) -> ApiResult<Json<WebhookExecution>> {
    let Json(body) = body?;
    let event = parse_events(&[body.event])?[0];
    Ok(Json(state.webhooks.send_test(&id, event).await?))
}
