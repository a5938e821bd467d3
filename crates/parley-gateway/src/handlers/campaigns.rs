// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign control.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use parley_campaign::{CampaignReport, NewCampaign};
use parley_core::types::{Campaign, CampaignRecipient};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::handlers::Page;
use crate::server::GatewayState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientsBody {
    pub contact_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientsAdded {
    /// Rows inserted by this call; contacts already present are not counted.
    pub added: usize,
    pub total_recipients: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBody {
    /// RFC 3339 timestamp.
    pub scheduled_for: String,
}

/// POST /v1/campaigns
pub async fn create_campaign(
    State(state): State<GatewayState>,
    caller: Caller,
    body: Result<Json<NewCampaign>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let Json(body) = body?;
    let campaign = state.campaigns.create(body, caller.user_id()).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// GET /v1/campaigns
pub async fn list_campaigns(
    State(state): State<GatewayState>,
    page: Result<Query<Page>, QueryRejection>,
) -> ApiResult<Json<Vec<Campaign>>> {
    let Query(page) = page?;
    Ok(Json(
        state
            .campaigns
            .list(page.limit_or(50), page.offset())
            .await?,
    ))
}

/// GET /v1/campaigns/{id}
pub async fn get_campaign(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CampaignReport>> {
    Ok(Json(state.campaigns.get(&id).await?))
}

/// GET /v1/campaigns/{id}/recipients
pub async fn list_recipients(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<CampaignRecipient>>> {
    Ok(Json(state.campaigns.recipients(&id).await?))
}

/// POST /v1/campaigns/{id}/recipients
///
/// Idempotent: contacts already on the campaign are skipped.
pub async fn add_recipients(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<RecipientsBody>, JsonRejection>,
) -> ApiResult<Json<RecipientsAdded>> {
    let Json(body) = body?;
    let added = state
        .campaigns
        .add_recipients(&id, &body.contact_ids)
        .await?;
    let report = state.campaigns.get(&id).await?;
    Ok(Json(RecipientsAdded {
        added,
        total_recipients: report.counts.total_recipients,
    }))
}

/// POST /v1/campaigns/{id}/execute
///
/// Moves the campaign to SENDING and returns; progress is visible through
/// `GET /v1/campaigns/{id}`.
pub async fn execute_campaign(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.campaigns.start(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(campaign)))
}

/// POST /v1/campaigns/{id}/schedule
pub async fn schedule_campaign(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<ScheduleBody>, JsonRejection>,
) -> ApiResult<Json<Campaign>> {
    let Json(body) = body?;
    Ok(Json(
        state.campaigns.schedule(&id, &body.scheduled_for).await?,
    ))
}

/// POST /v1/campaigns/{id}/cancel
pub async fn cancel_campaign(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Campaign>> {
    Ok(Json(state.campaigns.cancel(&id).await?))
}
