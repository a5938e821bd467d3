// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound send API.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parley_core::ParleyError;
use parley_core::types::Message;
use parley_engine::SendRequest;
use serde::Deserialize;

use crate::auth::Caller;
use crate::error::ApiResult;
use crate::server::GatewayState;

/// Body of `POST /v1/messages`.
///
/// Uploads travel inline as `mediaBase64`; they are kept in the media store
/// and served back from `/media/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessage {
    #[serde(flatten)]
    pub request: SendRequest,
    #[serde(default)]
    pub media_base64: Option<String>,
}

impl PostMessage {
    fn into_request(self) -> Result<SendRequest, ParleyError> {
        let mut request = self.request;
        if let Some(encoded) = self.media_base64.filter(|s| !s.is_empty()) {
            let data = STANDARD
                .decode(encoded.trim())
                .map_err(|e| ParleyError::validation(format!("mediaBase64 is not base64: {e}")))?;
            request.data = Some(data);
        }
        Ok(request)
    }
}

/// POST /v1/messages
///
/// Accepts and enqueues; the message comes back PENDING.
pub async fn post_message(
    State(state): State<GatewayState>,
    caller: Caller,
    body: Result<Json<PostMessage>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let Json(body) = body?;
    let request = body.into_request()?;
    let message = state
        .engine
        .pipeline
        .submit(request, caller.user_id())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(message)))
}

/// GET /v1/messages/{id}
pub async fn get_message(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    Ok(Json(state.engine.pipeline.get(&id).await?))
}

/// POST /v1/messages/{id}/resend
pub async fn resend_message(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    Ok(Json(state.engine.pipeline.resend(&id).await?))
}

#[cfg(test)]
mod tests {
    use parley_core::types::MessageType;

    use super::*;

    #[test]
    fn post_message_accepts_send_fields_and_upload() {
        let body: PostMessage = serde_json::from_str(
            r#"{"conversationId":"c1","type":"DOCUMENT","fileName":"a.pdf","mimetype":"application/pdf","mediaBase64":"aGVsbG8="}"#,
        )
        .unwrap();
        let request = body.into_request().unwrap();
        assert_eq!(request.conversation_id, "c1");
        assert_eq!(request.message_type, Some(MessageType::Document));
        assert_eq!(request.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(request.data.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn bad_base64_is_a_validation_error() {
        let body: PostMessage =
            serde_json::from_str(r#"{"conversationId":"c1","mediaBase64":"***"}"#).unwrap();
        assert!(matches!(
            body.into_request(),
            Err(ParleyError::Validation(_))
        ));
    }
}
