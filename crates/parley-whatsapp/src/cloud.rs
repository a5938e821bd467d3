// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter for the official cloud business API (Graph API).
//!
//! Sends go to `{base}/{version}/{phone_number_id}/messages` with a bearer
//! token. Inline media is uploaded first and referenced by id. Audio outside
//! the accepted container list is re-encoded to ogg/opus.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parley_config::model::{ChannelConfig, MediaConfig};
use parley_core::address::Address;
use parley_core::traits::{ChannelAdapter, PluginAdapter};
use parley_core::types::{
    AdapterType, AudioTransport, ChannelCapabilities, ChannelKind, DeliveryReceipt, HealthStatus,
    InboundEvent, InboundMedia, MediaSource, MessageStatus, MessageType, NormalizedEvent,
    OutboundPayload, ProviderMessageId, ProviderSendResult, SendContext, timestamp_now,
};
use parley_core::{ChannelError, ParleyError};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use tracing::{debug, info};

use crate::http;
use crate::media;
use crate::transcode::{OGG_OPUS, Transcoder};

type HmacSha256 = Hmac<Sha256>;

/// Audio containers the cloud API accepts as-is.
const ACCEPTED_AUDIO: &[&str] = &["audio/ogg", "audio/mpeg", "audio/aac", "audio/mp4", "audio/amr"];

/// Longest text body the cloud API accepts.
const MAX_TEXT_LENGTH: usize = 4096;

/// Cloud API channel adapter.
pub struct CloudChannel {
    channel_id: String,
    base_url: String,
    api_version: String,
    phone_number_id: String,
    client: reqwest::Client,
    /// Credential-free client for fetching third-party media URLs.
    media_client: reqwest::Client,
    app_secret: Option<String>,
    verify_token: Option<String>,
    transcoder: Transcoder,
}

impl CloudChannel {
    /// Creates a cloud adapter. Requires `access_token` and `phone_number_id`.
    pub fn new(config: &ChannelConfig, media_config: &MediaConfig) -> Result<Self, ParleyError> {
        let token = config.access_token.as_deref().filter(|s| !s.is_empty()).ok_or_else(|| {
            ParleyError::Config(format!("channel {}: cloud requires `access_token`", config.id))
        })?;
        let phone_number_id = config
            .phone_number_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ParleyError::Config(format!(
                    "channel {}: cloud requires `phone_number_id`",
                    config.id
                ))
            })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ParleyError::Config(format!("invalid access_token header value: {e}"))
            })?,
        );

        Ok(Self {
            channel_id: config.id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            phone_number_id,
            client: http::build_client(headers)?,
            media_client: http::build_client(HeaderMap::new())?,
            app_secret: config.app_secret.clone().filter(|s| !s.is_empty()),
            verify_token: config.verify_token.clone().filter(|s| !s.is_empty()),
            transcoder: Transcoder::new(media_config.ffmpeg_path.clone().map(Into::into)),
        })
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.base_url, self.api_version)
    }

    /// Retrieval URL for an inbound media id. Fetching it requires the bearer token.
    fn media_url(&self, media_id: &str) -> String {
        self.graph_url(media_id)
    }

    async fn post_message(&self, body: Value) -> Result<ProviderSendResult, ChannelError> {
        let url = self.graph_url(&format!("{}/messages", self.phone_number_id));
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(http::transport_error)?;
        let body = http::read_json(response, classify_graph_error).await?;
        let id = body
            .pointer("/messages/0/id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ChannelError::PermanentRejection("cloud response missing messages[0].id".into())
            })?;
        Ok(ProviderSendResult {
            provider_message_id: ProviderMessageId(id.to_string()),
            status: MessageStatus::Sent,
        })
    }

    /// Upload bytes to the media endpoint and return the media id.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        file_name: &str,
    ) -> Result<String, ChannelError> {
        let essence = media::mime_essence(mime_type);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(&essence)
            .map_err(|e| ChannelError::PermanentRejection(format!("invalid media type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", essence)
            .part("file", part);

        let url = self.graph_url(&format!("{}/media", self.phone_number_id));
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(http::transport_error)?;
        let body = http::read_json(response, classify_graph_error).await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChannelError::PermanentRejection("media upload returned no id".into()))
    }

    async fn source_bytes(&self, source: &MediaSource) -> Result<Vec<u8>, ChannelError> {
        match source {
            MediaSource::Bytes(bytes) => Ok(bytes.clone()),
            MediaSource::Url(url) => http::fetch_bytes(&self.media_client, url).await,
        }
    }

    /// Build the `{link}` or `{id}` media object, uploading and re-encoding as needed.
    async fn media_object(
        &self,
        kind: MessageType,
        source: &MediaSource,
        mime_type: &str,
        file_name: &str,
    ) -> Result<Map<String, Value>, ChannelError> {
        let mut object = Map::new();

        if kind == MessageType::Audio && !media::audio_accepted(ACCEPTED_AUDIO, mime_type) {
            let original = self.source_bytes(source).await?;
            let encoded = self.transcoder.to_ogg_opus(&original).await?;
            info!(
                channel_id = %self.channel_id,
                from = %media::mime_essence(mime_type),
                "re-encoded audio for cloud delivery"
            );
            let id = self.upload(encoded, OGG_OPUS, "audio.ogg").await?;
            object.insert("id".into(), Value::String(id));
            return Ok(object);
        }

        match source {
            MediaSource::Url(url) => {
                object.insert("link".into(), Value::String(url.clone()));
            }
            MediaSource::Bytes(bytes) => {
                let id = self.upload(bytes.clone(), mime_type, file_name).await?;
                object.insert("id".into(), Value::String(id));
            }
        }
        Ok(object)
    }

    fn normalize_value(&self, value: &Value, out: &mut Vec<NormalizedEvent>) {
        let names: Vec<(&str, &str)> = value
            .get("contacts")
            .and_then(Value::as_array)
            .map(|contacts| {
                contacts
                    .iter()
                    .filter_map(|c| {
                        Some((
                            c.get("wa_id")?.as_str()?,
                            c.pointer("/profile/name")?.as_str()?,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let messages = value.get("messages").and_then(Value::as_array);
        let statuses = value.get("statuses").and_then(Value::as_array);
        if messages.is_none() && statuses.is_none() {
            out.push(ignored("change without messages or statuses"));
            return;
        }

        for message in messages.into_iter().flatten() {
            out.push(self.normalize_message(message, &names));
        }
        for status in statuses.into_iter().flatten() {
            out.push(self.normalize_status(status));
        }
    }

    fn normalize_message(&self, message: &Value, names: &[(&str, &str)]) -> NormalizedEvent {
        let (Some(from), Some(id)) = (
            message.get("from").and_then(Value::as_str),
            message.get("id").and_then(Value::as_str),
        ) else {
            return ignored("message without from or id");
        };
        let kind = message.get("type").and_then(Value::as_str).unwrap_or("");

        let (message_type, content, media) = match kind {
            "text" => (
                MessageType::Text,
                message.pointer("/text/body").and_then(Value::as_str).map(str::to_string),
                None,
            ),
            "button" => (
                MessageType::Text,
                message.pointer("/button/text").and_then(Value::as_str).map(str::to_string),
                None,
            ),
            "interactive" => (
                MessageType::Text,
                message
                    .pointer("/interactive/button_reply/title")
                    .or_else(|| message.pointer("/interactive/list_reply/title"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                None,
            ),
            "image" | "sticker" | "video" | "audio" | "document" => {
                let node = &message[kind];
                let message_type = match kind {
                    "video" => MessageType::Video,
                    "audio" => MessageType::Audio,
                    "document" => MessageType::Document,
                    _ => MessageType::Image,
                };
                let Some(media_id) = node.get("id").and_then(Value::as_str) else {
                    return ignored("media message without id");
                };
                let mime_type = node
                    .get("mime_type")
                    .and_then(Value::as_str)
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let media = InboundMedia {
                    mime_type,
                    url: Some(self.media_url(media_id)),
                    data: None,
                    file_name: node.get("filename").and_then(Value::as_str).map(str::to_string),
                    duration_secs: None,
                    file_length: None,
                };
                let caption = node.get("caption").and_then(Value::as_str).map(str::to_string);
                (message_type, caption, Some(media))
            }
            other => return ignored(format!("unsupported cloud message type {other}")),
        };

        let timestamp = http::unix_field(message.get("timestamp"))
            .and_then(http::format_unix)
            .unwrap_or_else(timestamp_now);

        NormalizedEvent::Message(InboundEvent {
            channel_id: self.channel_id.clone(),
            raw_identifier: from.to_string(),
            observed_phone: Address::parse(from).phone().map(str::to_string),
            alt_identifier: None,
            display_name: names
                .iter()
                .find(|(wa_id, _)| *wa_id == from)
                .map(|(_, name)| name.to_string()),
            message_type,
            content,
            media,
            provider_message_id: id.to_string(),
            timestamp,
        })
    }

    fn normalize_status(&self, status: &Value) -> NormalizedEvent {
        let Some(id) = status.get("id").and_then(Value::as_str) else {
            return ignored("status without id");
        };
        let mapped = match status.get("status").and_then(Value::as_str) {
            Some("sent") => MessageStatus::Sent,
            Some("delivered") => MessageStatus::Delivered,
            Some("read") => MessageStatus::Read,
            Some("failed") => MessageStatus::Failed,
            other => return ignored(format!("untracked status {other:?}")),
        };
        let error = status.pointer("/errors/0").map(|e| {
            let code = e.get("code").and_then(Value::as_i64).unwrap_or_default();
            let title = e
                .get("title")
                .or_else(|| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("delivery failed");
            format!("{code}: {title}")
        });
        NormalizedEvent::Receipt(DeliveryReceipt {
            channel_id: self.channel_id.clone(),
            provider_message_id: id.to_string(),
            status: mapped,
            error,
            timestamp: http::unix_field(status.get("timestamp"))
                .and_then(http::format_unix)
                .unwrap_or_else(timestamp_now),
        })
    }
}

#[async_trait]
impl PluginAdapter for CloudChannel {
    fn name(&self) -> &str {
        "whatsapp-cloud"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        let response = match self.client.get(self.graph_url(&self.phone_number_id)).send().await {
            Ok(r) => r,
            Err(e) => return Ok(HealthStatus::Unhealthy(format!("graph API unreachable: {e}"))),
        };
        match http::read_json(response, classify_graph_error).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(ChannelError::Auth(m)) => Ok(HealthStatus::Degraded(m)),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        debug!(channel_id = %self.channel_id, "cloud channel shutting down");
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for CloudChannel {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Cloud
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_images: true,
            supports_video: true,
            supports_audio: true,
            supports_documents: true,
            audio_transport: AudioTransport::Url,
            accepted_audio: ACCEPTED_AUDIO.to_vec(),
            max_text_length: Some(MAX_TEXT_LENGTH),
        }
    }

    async fn send(
        &self,
        ctx: &SendContext,
        payload: &OutboundPayload,
    ) -> Result<ProviderSendResult, ChannelError> {
        let address = Address::parse(&ctx.recipient);
        let to = address.phone().ok_or_else(|| {
            ChannelError::PermanentRejection(format!(
                "cloud API needs a phone number, got {}",
                ctx.recipient
            ))
        })?;
        debug!(
            channel_id = %self.channel_id,
            message_id = %ctx.message_id,
            "sending via cloud API"
        );

        let body = match payload {
            OutboundPayload::Text { body } => {
                if body.chars().count() > MAX_TEXT_LENGTH {
                    return Err(ChannelError::PermanentRejection(format!(
                        "text exceeds {MAX_TEXT_LENGTH} characters"
                    )));
                }
                json!({
                    "messaging_product": "whatsapp",
                    "recipient_type": "individual",
                    "to": to,
                    "type": "text",
                    "text": { "preview_url": false, "body": body },
                })
            }
            OutboundPayload::Media {
                kind,
                source,
                mime_type,
                file_name,
                caption,
            } => {
                let file_name = file_name
                    .clone()
                    .unwrap_or_else(|| media::default_file_name(*kind, mime_type));
                let mut object = self.media_object(*kind, source, mime_type, &file_name).await?;
                if let (Some(caption), false) = (caption, *kind == MessageType::Audio) {
                    object.insert("caption".into(), Value::String(caption.clone()));
                }
                if *kind == MessageType::Document {
                    object.insert("filename".into(), Value::String(file_name));
                }
                let label = media::media_label(*kind);
                json!({
                    "messaging_product": "whatsapp",
                    "recipient_type": "individual",
                    "to": to,
                    "type": label,
                    label: Value::Object(object),
                })
            }
        };

        self.post_message(body).await
    }

    fn normalize_inbound(&self, raw: &Value) -> Result<Vec<NormalizedEvent>, ParleyError> {
        let entries = raw
            .get("entry")
            .and_then(Value::as_array)
            .ok_or_else(|| ParleyError::Channel {
                message: "cloud payload missing `entry`".into(),
                source: None,
            })?;

        let mut out = Vec::new();
        for change in entries
            .iter()
            .filter_map(|e| e.get("changes").and_then(Value::as_array))
            .flatten()
        {
            match change.get("value") {
                Some(value) => self.normalize_value(value, &mut out),
                None => out.push(ignored("change without value")),
            }
        }
        Ok(out)
    }

    fn verify_inbound(&self, signature: Option<&str>, body: &[u8]) -> Result<(), ParleyError> {
        let Some(secret) = self.app_secret.as_deref() else {
            return Ok(());
        };
        let invalid = |message: &str| ParleyError::Channel {
            message: format!("X-Hub-Signature-256 rejected: {message}"),
            source: None,
        };
        let signature = signature.ok_or_else(|| invalid("header missing"))?;
        let hex_digest = signature
            .trim()
            .strip_prefix("sha256=")
            .ok_or_else(|| invalid("expected sha256= prefix"))?;
        let expected = hex::decode(hex_digest).map_err(|_| invalid("not hex"))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ParleyError::Internal(format!("hmac key: {e}")))?;
        mac.update(body);
        mac.verify_slice(&expected).map_err(|_| invalid("digest mismatch"))
    }

    fn verify_subscription(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        let expected = self.verify_token.as_deref()?;
        (mode == "subscribe" && token == expected).then(|| challenge.to_string())
    }
}

/// Classify a Graph API failure from its structured error code, falling back to HTTP status.
fn classify_graph_error(status: StatusCode, headers: &HeaderMap, body: &str) -> ChannelError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error.and_then(|e| e.get("code")).and_then(Value::as_i64);
    let detail = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body);

    match code {
        Some(190) => ChannelError::Auth(format!("graph error 190: {detail}")),
        Some(c @ (4 | 80007 | 130429 | 131056)) => ChannelError::RateLimited {
            message: format!("graph error {c}: {detail}"),
            retry_after: http::retry_after(headers),
        },
        Some(c @ (1 | 2 | 131000 | 131016)) => {
            ChannelError::Transient(format!("graph error {c}: {detail}"))
        }
        _ => http::classify_status(status, headers, body),
    }
}

fn ignored(reason: impl Into<String>) -> NormalizedEvent {
    NormalizedEvent::Ignored {
        reason: reason.into(),
    }
}
