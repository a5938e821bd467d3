// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel health listing and degradation reset.

use axum::Json;
use axum::extract::{Path, State};
use parley_engine::ChannelStatus;
use serde::Serialize;

use crate::error::ApiResult;
use crate::server::GatewayState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub channel_id: String,
    /// Whether the channel was degraded before the reset.
    pub was_degraded: bool,
}

/// GET /v1/channels
pub async fn list_channels(State(state): State<GatewayState>) -> Json<Vec<ChannelStatus>> {
    Json(state.engine.channels())
}

/// POST /v1/channels/{id}/reset
pub async fn reset_channel(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ResetResponse>> {
    let was_degraded = state.engine.reset_channel(&id)?;
    if was_degraded {
        tracing::info!(channel_id = %id, "channel degradation cleared");
    }
    Ok(Json(ResetResponse {
        channel_id: id,
        was_degraded,
    }))
}
