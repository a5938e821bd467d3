// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider callbacks: subscription handshake and inbound event delivery.
//!
//! These routes are public. Authenticity comes from the provider signature
//! checked by the channel adapter.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use parley_core::ParleyError;
use parley_engine::InboundSummary;
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::server::GatewayState;

/// Signature headers, checked in order.
const SIGNATURE_HEADERS: [&str; 2] = ["x-hub-signature-256", "x-parley-signature"];

#[derive(Debug, Default, Deserialize)]
pub struct HubQuery {
    #[serde(rename = "hub.mode", default)]
    pub mode: String,
    #[serde(rename = "hub.verify_token", default)]
    pub verify_token: String,
    #[serde(rename = "hub.challenge", default)]
    pub challenge: String,
}

fn signature(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}

/// GET /webhooks/{channel_id}
///
/// Echoes `hub.challenge` when the verify token matches.
pub async fn verify_subscription(
    State(state): State<GatewayState>,
    Path(channel_id): Path<String>,
    Query(query): Query<HubQuery>,
) -> ApiResult<String> {
    state
        .engine
        .inbound
        .verify_subscription(&channel_id, &query.mode, &query.verify_token, &query.challenge)
        .map_err(|e| match e {
            ParleyError::Channel { message, .. } => {
                tracing::warn!(%channel_id, "webhook subscription handshake rejected");
                ApiError::new(StatusCode::FORBIDDEN, "forbidden", message)
            }
            other => other.into(),
        })
}

/// POST /webhooks/{channel_id}
pub async fn post_inbound(
    State(state): State<GatewayState>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<Json<InboundSummary>> {
    let body = body?;
    let summary = state
        .engine
        .inbound
        .handle_webhook(&channel_id, signature(&headers), &body)
        .await
        .map_err(|e| match e {
            ParleyError::Channel { message, .. } => {
                tracing::warn!(%channel_id, error = %message, "inbound webhook rejected");
                ApiError::unauthorized(message)
            }
            other => other.into(),
        })?;
    tracing::debug!(
        %channel_id,
        received = summary.received,
        duplicates = summary.duplicates,
        receipts = summary.receipts,
        "inbound webhook processed"
    );
    Ok(Json(summary))
}
