// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Media retrieval from the blob store.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use parley_storage::queries::media;
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::server::GatewayState;

fn content_disposition(file_name: Option<&str>) -> String {
    match file_name {
        Some(name) => {
            let safe: String = name
                .chars()
                .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
                .collect();
            format!("inline; filename=\"{safe}\"")
        }
        None => "inline".to_string(),
    }
}

/// GET /media/{message_id}
///
/// Serves the stored blob. When none is held, answers 404 and includes the
/// provider URL from the message (if any) so clients can fall back to it.
pub async fn get_media(
    State(state): State<GatewayState>,
    Path(message_id): Path<String>,
) -> ApiResult<Response> {
    let db = state.engine.database();
    if let Some(blob) = media::get_media(db, &message_id).await? {
        let headers = [
            (header::CONTENT_TYPE, blob.mime_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(blob.file_name.as_deref()),
            ),
        ];
        return Ok((headers, blob.data).into_response());
    }

    let message = state.engine.pipeline.get(&message_id).await?;
    let url = message.media.and_then(|m| m.url);
    Err(ApiError::new(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("no stored media for message {message_id}"),
    )
    .with_extra(json!({ "url": url })))
}
