// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation control and contact lookup.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use parley_core::types::{Contact, Conversation, ConversationStatus, Message, Priority};
use parley_storage::ConversationFilter;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::handlers::Page;
use crate::server::GatewayState;

/// `GET /v1/conversations` filters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    pub status: Option<ConversationStatus>,
    pub assigned_user_id: Option<String>,
    pub channel_id: Option<String>,
    pub contact_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<ConversationQuery> for ConversationFilter {
    fn from(q: ConversationQuery) -> Self {
        ConversationFilter {
            status: q.status,
            assigned_user_id: q.assigned_user_id,
            channel_id: q.channel_id,
            contact_id: q.contact_id,
            limit: q.limit.unwrap_or(50),
            offset: q.offset.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversation {
    pub channel_id: String,
    pub phone: String,
    /// Start a separate conversation instead of reusing the active one.
    #[serde(default)]
    pub new: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    /// `null` or absent clears the assignee.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: ConversationStatus,
}

#[derive(Debug, Deserialize)]
pub struct PriorityBody {
    pub priority: Priority,
}

/// GET /v1/conversations
pub async fn list_conversations(
    State(state): State<GatewayState>,
    query: Result<Query<ConversationQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let Query(query) = query?;
    Ok(Json(state.engine.conversations.list(query.into()).await?))
}

/// POST /v1/conversations
///
/// Resolves the phone number to a contact and opens (or reuses) its
/// active conversation. With `"new": true` a separate conversation is
/// always created.
pub async fn start_conversation(
    State(state): State<GatewayState>,
    body: Result<Json<StartConversation>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let Json(body) = body?;
    let conversations = &state.engine.conversations;
    let conversation = if body.new {
        conversations
            .create_from_phone(&body.channel_id, &body.phone)
            .await?
    } else {
        conversations
            .start_from_phone(&body.channel_id, &body.phone)
            .await?
    };
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /v1/conversations/{id}
pub async fn get_conversation(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.conversations.get(&id).await?))
}

/// GET /v1/conversations/{id}/messages
pub async fn list_messages(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    page: Result<Query<Page>, QueryRejection>,
) -> ApiResult<Json<Vec<Message>>> {
    let Query(page) = page?;
    let messages = state
        .engine
        .conversations
        .messages(&id, page.limit_or(50), page.offset())
        .await?;
    Ok(Json(messages))
}

/// POST /v1/conversations/{id}/read
pub async fn mark_read(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.conversations.mark_read(&id).await?))
}

/// PUT /v1/conversations/{id}/assign
pub async fn assign(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<AssignBody>, JsonRejection>,
) -> ApiResult<Json<Conversation>> {
    let Json(body) = body?;
    let conversation = state
        .engine
        .conversations
        .assign(&id, body.user_id.as_deref())
        .await?;
    Ok(Json(conversation))
}

/// PUT /v1/conversations/{id}/status
pub async fn set_status(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult<Json<Conversation>> {
    let Json(body) = body?;
    Ok(Json(
        state.engine.conversations.set_status(&id, body.status).await?,
    ))
}

/// PUT /v1/conversations/{id}/priority
pub async fn set_priority(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<PriorityBody>, JsonRejection>,
) -> ApiResult<Json<Conversation>> {
    let Json(body) = body?;
    Ok(Json(
        state
            .engine
            .conversations
            .set_priority(&id, body.priority)
            .await?,
    ))
}

/// GET /v1/contacts/{id}
pub async fn get_contact(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(state.engine.identity.get(&id).await?))
}
