// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter for the unofficial multi-device bridge gateway.
//!
//! The bridge exposes one REST instance per WhatsApp number, authenticated
//! with an `apikey` header. Audio must be delivered inline as base64; other
//! media may be a URL or base64.

use async_trait::async_trait;
use parley_config::model::ChannelConfig;
use parley_core::address::Address;
use parley_core::traits::{ChannelAdapter, PluginAdapter};
use parley_core::types::{
    AdapterType, AudioTransport, ChannelCapabilities, ChannelKind, DeliveryReceipt, HealthStatus,
    InboundEvent, InboundMedia, MediaSource, MessageStatus, MessageType, NormalizedEvent,
    OutboundPayload, ProviderMessageId, ProviderSendResult, SendContext, timestamp_now,
};
use parley_core::{ChannelError, ParleyError};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::http;
use crate::media;

/// Bridge channel adapter.
pub struct BridgeChannel {
    channel_id: String,
    base_url: String,
    instance: String,
    client: reqwest::Client,
    /// Credential-free client for fetching third-party media URLs.
    media_client: reqwest::Client,
}

impl BridgeChannel {
    /// Creates a bridge adapter. Requires `instance` and `api_key`.
    pub fn new(config: &ChannelConfig) -> Result<Self, ParleyError> {
        let instance = config.instance.clone().filter(|s| !s.is_empty()).ok_or_else(|| {
            ParleyError::Config(format!("channel {}: bridge requires `instance`", config.id))
        })?;
        let api_key = config.api_key.as_deref().filter(|s| !s.is_empty()).ok_or_else(|| {
            ParleyError::Config(format!("channel {}: bridge requires `api_key`", config.id))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key).map_err(|e| {
                ParleyError::Config(format!("invalid api_key header value: {e}"))
            })?,
        );

        Ok(Self {
            channel_id: config.id.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            instance,
            client: http::build_client(headers)?,
            media_client: http::build_client(HeaderMap::new())?,
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{action}/{}", self.base_url, self.instance)
    }

    /// The bridge takes bare digits for phone contacts and the full JID otherwise.
    fn number_for(recipient: &str) -> String {
        match Address::parse(recipient) {
            Address::Phone(digits) => digits,
            other => other.identifier(),
        }
    }

    async fn post(&self, url: String, body: Value) -> Result<ProviderSendResult, ChannelError> {
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(http::transport_error)?;
        let body = http::read_json(response, http::classify_status).await?;

        let id = body
            .pointer("/key/id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ChannelError::PermanentRejection("bridge response missing key.id".into())
            })?;

        Ok(ProviderSendResult {
            provider_message_id: ProviderMessageId(id.to_string()),
            status: MessageStatus::Sent,
        })
    }

    async fn media_bytes(&self, source: &MediaSource) -> Result<Vec<u8>, ChannelError> {
        match source {
            MediaSource::Bytes(bytes) => Ok(bytes.clone()),
            MediaSource::Url(url) => http::fetch_bytes(&self.media_client, url).await,
        }
    }
}

#[async_trait]
impl PluginAdapter for BridgeChannel {
    fn name(&self) -> &str {
        "whatsapp-bridge"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        let url = self.endpoint("instance/connectionState");
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                return Ok(HealthStatus::Unhealthy(format!("bridge unreachable: {e}")));
            }
        };
        match http::read_json(response, http::classify_status).await {
            Ok(body) => {
                let state = body
                    .pointer("/instance/state")
                    .or_else(|| body.get("state"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                if state == "open" {
                    Ok(HealthStatus::Healthy)
                } else {
                    Ok(HealthStatus::Degraded(format!("instance state is {state}")))
                }
            }
            Err(ChannelError::Auth(m)) => Ok(HealthStatus::Degraded(m)),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        debug!(channel_id = %self.channel_id, "bridge channel shutting down");
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for BridgeChannel {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Bridge
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            supports_images: true,
            supports_video: true,
            supports_audio: true,
            supports_documents: true,
            audio_transport: AudioTransport::Base64,
            accepted_audio: Vec::new(),
            max_text_length: None,
        }
    }

    async fn send(
        &self,
        ctx: &SendContext,
        payload: &OutboundPayload,
    ) -> Result<ProviderSendResult, ChannelError> {
        let number = Self::number_for(&ctx.recipient);
        debug!(
            channel_id = %self.channel_id,
            message_id = %ctx.message_id,
            "sending via bridge"
        );

        match payload {
            OutboundPayload::Text { body } => {
                self.post(
                    self.endpoint("message/sendText"),
                    json!({ "number": number, "text": body }),
                )
                .await
            }
            OutboundPayload::Media {
                kind: MessageType::Audio,
                source,
                ..
            } => {
                let bytes = self.media_bytes(source).await?;
                self.post(
                    self.endpoint("message/sendWhatsAppAudio"),
                    json!({
                        "number": number,
                        "audio": media::encode_base64(&bytes),
                        "encoding": true,
                    }),
                )
                .await
            }
            OutboundPayload::Media {
                kind,
                source,
                mime_type,
                file_name,
                caption,
            } => {
                let media_field = match source {
                    MediaSource::Url(url) => url.clone(),
                    MediaSource::Bytes(bytes) => media::encode_base64(bytes),
                };
                let file_name = file_name
                    .clone()
                    .unwrap_or_else(|| media::default_file_name(*kind, mime_type));
                self.post(
                    self.endpoint("message/sendMedia"),
                    json!({
                        "number": number,
                        "mediatype": media::media_label(*kind),
                        "mimetype": media::mime_essence(mime_type),
                        "caption": caption.clone().unwrap_or_default(),
                        "media": media_field,
                        "fileName": file_name,
                    }),
                )
                .await
            }
        }
    }

    fn normalize_inbound(&self, raw: &Value) -> Result<Vec<NormalizedEvent>, ParleyError> {
        let event = raw
            .get("event")
            .and_then(Value::as_str)
            .map(normalize_event_name)
            .ok_or_else(|| ParleyError::Channel {
                message: "bridge payload missing `event`".into(),
                source: None,
            })?;

        let items: Vec<&Value> = match raw.get("data") {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(item @ Value::Object(_)) => vec![item],
            _ => Vec::new(),
        };

        let events = match event.as_str() {
            "messages.upsert" => items
                .into_iter()
                .map(|item| self.normalize_upsert(item))
                .collect(),
            "messages.update" => items
                .into_iter()
                .map(|item| self.normalize_update(item))
                .collect(),
            other => vec![ignored(format!("unhandled bridge event {other}"))],
        };
        Ok(events)
    }
}

impl BridgeChannel {
    fn normalize_upsert(&self, item: &Value) -> NormalizedEvent {
        let key = &item["key"];
        if key.get("fromMe").and_then(Value::as_bool).unwrap_or(false) {
            return ignored("own message echo");
        }
        let Some(remote) = key.get("remoteJid").and_then(Value::as_str) else {
            return ignored("message without remoteJid");
        };
        let Some(id) = key.get("id").and_then(Value::as_str) else {
            return ignored("message without key.id");
        };

        let address = Address::parse(remote);
        if matches!(address, Address::Group(_)) {
            return ignored("group chat");
        }

        let observed_phone = address.phone().map(str::to_string).or_else(|| {
            [
                key.get("senderPn"),
                key.get("remoteJidAlt"),
                item.get("senderPn"),
            ]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find_map(|alt| Address::parse(alt).phone().map(str::to_string))
        });

        let alt_identifier = [key.get("remoteJidAlt"), key.get("senderLid")]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find(|alt| Address::parse(alt).is_lid() && !address.is_lid())
            .map(str::to_string);

        let message = &item["message"];
        let Some((message_type, content, mut media)) = extract_content(message) else {
            return ignored("unsupported bridge message type");
        };
        if let Some(media) = media.as_mut() {
            let inline = message
                .get("base64")
                .or_else(|| item.get("base64"))
                .and_then(Value::as_str);
            if let Some(raw) = inline {
                media.data = media::decode_base64(raw);
                if media.data.is_none() {
                    warn!(channel_id = %self.channel_id, provider_message_id = %id, "undecodable inline media");
                }
            }
        }

        let timestamp = http::unix_field(item.get("messageTimestamp"))
            .and_then(http::format_unix)
            .unwrap_or_else(timestamp_now);

        NormalizedEvent::Message(InboundEvent {
            channel_id: self.channel_id.clone(),
            raw_identifier: remote.to_string(),
            observed_phone,
            alt_identifier,
            display_name: item
                .get("pushName")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            message_type,
            content,
            media,
            provider_message_id: id.to_string(),
            timestamp,
        })
    }

    fn normalize_update(&self, item: &Value) -> NormalizedEvent {
        let from_me = item
            .get("fromMe")
            .or_else(|| item.pointer("/key/fromMe"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !from_me {
            return ignored("status update for inbound message");
        }
        let Some(id) = item
            .get("keyId")
            .or_else(|| item.pointer("/key/id"))
            .and_then(Value::as_str)
        else {
            return ignored("status update without message id");
        };
        let status = item
            .get("status")
            .or_else(|| item.pointer("/update/status"))
            .and_then(map_ack);
        let Some(status) = status else {
            return ignored("status update without a trackable state");
        };

        NormalizedEvent::Receipt(DeliveryReceipt {
            channel_id: self.channel_id.clone(),
            provider_message_id: id.to_string(),
            status,
            error: (status == MessageStatus::Failed)
                .then(|| "bridge reported delivery error".to_string()),
            timestamp: timestamp_now(),
        })
    }
}

fn ignored(reason: impl Into<String>) -> NormalizedEvent {
    NormalizedEvent::Ignored {
        reason: reason.into(),
    }
}

/// `MESSAGES_UPSERT` and `messages.upsert` are both seen in the wild.
fn normalize_event_name(name: &str) -> String {
    name.to_ascii_lowercase().replace('_', ".")
}

/// Map a bridge acknowledgement (string or numeric) onto the delivery ladder.
fn map_ack(value: &Value) -> Option<MessageStatus> {
    match value {
        Value::String(s) => match s.as_str() {
            "SERVER_ACK" => Some(MessageStatus::Sent),
            "DELIVERY_ACK" => Some(MessageStatus::Delivered),
            "READ" | "PLAYED" => Some(MessageStatus::Read),
            "ERROR" => Some(MessageStatus::Failed),
            _ => None,
        },
        Value::Number(n) => match n.as_i64()? {
            0 => Some(MessageStatus::Failed),
            2 => Some(MessageStatus::Sent),
            3 => Some(MessageStatus::Delivered),
            4 | 5 => Some(MessageStatus::Read),
            _ => None,
        },
        _ => None,
    }
}

fn extract_content(message: &Value) -> Option<(MessageType, Option<String>, Option<InboundMedia>)> {
    if let Some(text) = message.get("conversation").and_then(Value::as_str) {
        return Some((MessageType::Text, Some(text.to_string()), None));
    }
    if let Some(text) = message.pointer("/extendedTextMessage/text").and_then(Value::as_str) {
        return Some((MessageType::Text, Some(text.to_string()), None));
    }

    let candidates = [
        ("imageMessage", MessageType::Image, "image/jpeg"),
        ("stickerMessage", MessageType::Image, "image/webp"),
        ("videoMessage", MessageType::Video, "video/mp4"),
        ("audioMessage", MessageType::Audio, "audio/ogg"),
        ("pttMessage", MessageType::Audio, "audio/ogg"),
        ("documentMessage", MessageType::Document, "application/octet-stream"),
    ];
    let document_with_caption = message.pointer("/documentWithCaptionMessage/message/documentMessage");

    for (field, kind, fallback_mime) in candidates {
        let node = match message.get(field) {
            Some(node) => node,
            None if field == "documentMessage" => match document_with_caption {
                Some(node) => node,
                None => continue,
            },
            None => continue,
        };
        let caption = node
            .get("caption")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let media = InboundMedia {
            mime_type: node
                .get("mimetype")
                .and_then(Value::as_str)
                .unwrap_or(fallback_mime)
                .to_string(),
            url: node.get("url").and_then(Value::as_str).map(str::to_string),
            data: None,
            file_name: node.get("fileName").and_then(Value::as_str).map(str::to_string),
            duration_secs: node
                .get("seconds")
                .and_then(Value::as_u64)
                .and_then(|s| u32::try_from(s).ok()),
            file_length: http::unix_field(node.get("fileLength")).and_then(|n| u64::try_from(n).ok()),
        };
        return Some((kind, caption, Some(media)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> ChannelConfig {
        ChannelConfig {
            id: "wa-bridge".into(),
            name: None,
            kind: ChannelKind::Bridge,
            base_url: base_url.into(),
            instance: Some("main".into()),
            api_key: Some("secret-key".into()),
            access_token: None,
            phone_number_id: None,
            app_secret: None,
            verify_token: None,
            api_version: "v21.0".into(),
        }
    }

    fn ctx(recipient: &str) -> SendContext {
        SendContext {
            channel_id: "wa-bridge".into(),
            conversation_id: "conv-1".into(),
            message_id: "msg-1".into(),
            recipient: recipient.into(),
        }
    }

    fn sent_response(id: &str) -> ResponseTemplate {
        ResponseTemplate::new(201).set_body_json(json!({
            "key": { "remoteJid": "5511999990000@s.whatsapp.net", "fromMe": true, "id": id },
            "status": "PENDING"
        }))
    }

    #[test]
    fn new_requires_credentials() {
        let mut cfg = config("http://localhost");
        cfg.api_key = None;
        assert!(matches!(BridgeChannel::new(&cfg), Err(ParleyError::Config(_))));
        let mut cfg = config("http://localhost");
        cfg.instance = Some(String::new());
        assert!(BridgeChannel::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn text_send_uses_apikey_and_bare_number() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/main"))
            .and(header("apikey", "secret-key"))
            .and(body_partial_json(json!({ "number": "5511999990000", "text": "hello" })))
            .respond_with(sent_response("ABC123"))
            .expect(1)
            .mount(&server)
            .await;

        let channel = BridgeChannel::new(&config(&server.uri())).unwrap();
        let result = channel
            .send(
                &ctx("5511999990000@s.whatsapp.net"),
                &OutboundPayload::Text {
                    body: "hello".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.provider_message_id.0, "ABC123");
        assert_eq!(result.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn lid_recipient_keeps_full_jid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendText/main"))
            .and(body_partial_json(json!({ "number": "AB12CD@lid" })))
            .respond_with(sent_response("L1"))
            .expect(1)
            .mount(&server)
            .await;

        let channel = BridgeChannel::new(&config(&server.uri())).unwrap();
        channel
            .send(&ctx("AB12CD@lid"), &OutboundPayload::Text { body: "hi".into() })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn audio_url_is_fetched_and_inlined() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/note.webm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"voice".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/message/sendWhatsAppAudio/main"))
            .and(body_partial_json(json!({ "audio": media::encode_base64(b"voice") })))
            .respond_with(sent_response("AUD1"))
            .expect(1)
            .mount(&server)
            .await;

        let channel = BridgeChannel::new(&config(&server.uri())).unwrap();
        let payload = OutboundPayload::Media {
            kind: MessageType::Audio,
            source: MediaSource::Url(format!("{}/files/note.webm", server.uri())),
            mime_type: "audio/webm".into(),
            file_name: None,
            caption: None,
        };
        let result = channel.send(&ctx("5511999990000"), &payload).await.unwrap();
        assert_eq!(result.provider_message_id.0, "AUD1");
    }

    #[tokio::test]
    async fn image_bytes_are_sent_as_base64_media() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message/sendMedia/main"))
            .and(body_partial_json(json!({
                "mediatype": "image",
                "mimetype": "image/png",
                "caption": "look",
                "media": media::encode_base64(b"png"),
                "fileName": "image.png",
            })))
            .respond_with(sent_response("IMG1"))
            .expect(1)
            .mount(&server)
            .await;

        let channel = BridgeChannel::new(&config(&server.uri())).unwrap();
        let payload = OutboundPayload::Media {
            kind: MessageType::Image,
            source: MediaSource::Bytes(b"png".to_vec()),
            mime_type: "image/png".into(),
            file_name: None,
            caption: Some("look".into()),
        };
        channel.send(&ctx("5511999990000"), &payload).await.unwrap();
    }

    #[tokio::test]
    async fn error_statuses_map_to_taxonomy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "text": "auth" })))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "text": "slow" })))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "4"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "text": "down" })))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "text": "bad" })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": 400,
                "response": { "message": [{ "exists": false }] }
            })))
            .mount(&server)
            .await;

        let channel = BridgeChannel::new(&config(&server.uri())).unwrap();
        let send = |text: &'static str| {
            let channel = &channel;
            async move {
                channel
                    .send(&ctx("5511999990000"), &OutboundPayload::Text { body: text.into() })
                    .await
                    .unwrap_err()
            }
        };

        assert!(matches!(send("auth").await, ChannelError::Auth(_)));
        let limited = send("slow").await;
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(4)));
        assert!(matches!(send("down").await, ChannelError::Transient(_)));
        assert!(matches!(send("bad").await, ChannelError::PermanentRejection(_)));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_transient() {
        let channel = BridgeChannel::new(&config("http://127.0.0.1:1")).unwrap();
        let err = channel
            .send(&ctx("5511999990000"), &OutboundPayload::Text { body: "x".into() })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn health_reflects_connection_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/connectionState/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instance": { "instanceName": "main", "state": "open" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/instance/connectionState/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instance": { "instanceName": "main", "state": "close" }
            })))
            .mount(&server)
            .await;

        let channel = BridgeChannel::new(&config(&server.uri())).unwrap();
        assert_eq!(channel.health_check().await.unwrap(), HealthStatus::Healthy);
        assert!(matches!(
            channel.health_check().await.unwrap(),
            HealthStatus::Degraded(_)
        ));
    }

    fn channel() -> BridgeChannel {
        BridgeChannel::new(&config("http://localhost")).unwrap()
    }

    #[test]
    fn upsert_text_from_phone_jid() {
        let raw = json!({
            "event": "messages.upsert",
            "instance": "main",
            "data": {
                "key": { "remoteJid": "5511999990000@s.whatsapp.net", "fromMe": false, "id": "M1" },
                "pushName": "Ana",
                "message": { "conversation": "oi" },
                "messageTimestamp": 1_700_000_000
            }
        });
        let events = channel().normalize_inbound(&raw).unwrap();
        let NormalizedEvent::Message(msg) = &events[0] else {
            panic!("expected message, got {events:?}");
        };
        assert_eq!(msg.raw_identifier, "5511999990000@s.whatsapp.net");
        assert_eq!(msg.observed_phone.as_deref(), Some("5511999990000"));
        assert_eq!(msg.display_name.as_deref(), Some("Ana"));
        assert_eq!(msg.content.as_deref(), Some("oi"));
        assert_eq!(msg.timestamp, "2023-11-14T22:13:20.000Z");
        assert!(msg.alt_identifier.is_none());
    }

    #[test]
    fn upsert_from_phone_carries_lid_alias() {
        let raw = json!({
            "event": "messages.upsert",
            "data": {
                "key": {
                    "remoteJid": "5511999990000@s.whatsapp.net",
                    "remoteJidAlt": "AB12CD@lid",
                    "fromMe": false,
                    "id": "M5"
                },
                "message": { "conversation": "hi" }
            }
        });
        let events = channel().normalize_inbound(&raw).unwrap();
        let NormalizedEvent::Message(msg) = &events[0] else {
            panic!("expected message");
        };
        assert_eq!(msg.alt_identifier.as_deref(), Some("AB12CD@lid"));
        assert_eq!(msg.observed_phone.as_deref(), Some("5511999990000"));
    }

    #[test]
    fn upsert_from_lid_picks_up_sender_phone() {
        let raw = json!({
            "event": "MESSAGES_UPSERT",
            "data": {
                "key": {
                    "remoteJid": "AB12CD@lid",
                    "senderPn": "5511999990000@s.whatsapp.net",
                    "fromMe": false,
                    "id": "M2"
                },
                "message": { "extendedTextMessage": { "text": "hello" } }
            }
        });
        let events = channel().normalize_inbound(&raw).unwrap();
        let NormalizedEvent::Message(msg) = &events[0] else {
            panic!("expected message");
        };
        assert_eq!(msg.raw_identifier, "AB12CD@lid");
        assert_eq!(msg.observed_phone.as_deref(), Some("5511999990000"));
        assert_eq!(msg.message_type, MessageType::Text);
    }

    #[test]
    fn upsert_lid_without_phone() {
        let raw = json!({
            "event": "messages.upsert",
            "data": {
                "key": { "remoteJid": "AB12CD@lid", "fromMe": false, "id": "M3" },
                "message": { "conversation": "x" }
            }
        });
        let events = channel().normalize_inbound(&raw).unwrap();
        let NormalizedEvent::Message(msg) = &events[0] else {
            panic!("expected message");
        };
        assert!(msg.observed_phone.is_none());
    }

    #[test]
    fn upsert_image_with_inline_base64() {
        let raw = json!({
            "event": "messages.upsert",
            "data": {
                "key": { "remoteJid": "5511999990000@s.whatsapp.net", "fromMe": false, "id": "M4" },
                "message": {
                    "imageMessage": {
                        "mimetype": "image/jpeg",
                        "caption": "receipt",
                        "url": "https://mmg.whatsapp.net/x",
                        "fileLength": "1234"
                    },
                    "base64": media::encode_base64(b"jpeg-bytes")
                }
            }
        });
        let events = channel().normalize_inbound(&raw).unwrap();
        let NormalizedEvent::Message(msg) = &events[0] else {
            panic!("expected message");
        };
        assert_eq!(msg.message_type, MessageType::Image);
        assert_eq!(msg.content.as_deref(), Some("receipt"));
        let media = msg.media.as_ref().unwrap();
        assert_eq!(media.data.as_deref(), Some(&b"jpeg-bytes"[..]));
        assert_eq!(media.file_length, Some(1234));
    }

    #[test]
    fn own_echo_groups_and_unknown_events_are_ignored() {
        let raw = json!({
            "event": "messages.upsert",
            "data": [
                {
                    "key": { "remoteJid": "5511999990000@s.whatsapp.net", "fromMe": true, "id": "E1" },
                    "message": { "conversation": "mine" }
                },
                {
                    "key": { "remoteJid": "123-456@g.us", "fromMe": false, "id": "G1" },
                    "message": { "conversation": "group" }
                },
                {
                    "key": { "remoteJid": "5511999990000@s.whatsapp.net", "fromMe": false, "id": "P1" },
                    "message": { "pollCreationMessage": {} }
                }
            ]
        });
        let events = channel().normalize_inbound(&raw).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| matches!(e, NormalizedEvent::Ignored { .. })));

        let other = json!({ "event": "connection.update", "data": { "state": "open" } });
        assert!(matches!(
            channel().normalize_inbound(&other).unwrap()[0],
            NormalizedEvent::Ignored { .. }
        ));
        assert!(channel().normalize_inbound(&json!({ "data": {} })).is_err());
    }

    #[test]
    fn update_statuses_map_to_receipts() {
        let raw = json!({
            "event": "messages.update",
            "data": [
                { "keyId": "A", "fromMe": true, "status": "DELIVERY_ACK" },
                { "keyId": "B", "fromMe": true, "status": "READ" },
                { "keyId": "C", "fromMe": true, "status": "ERROR" },
                { "keyId": "D", "fromMe": true, "status": 2 },
                { "keyId": "E", "fromMe": false, "status": "READ" },
                { "keyId": "F", "fromMe": true, "status": "PENDING" }
            ]
        });
        let events = channel().normalize_inbound(&raw).unwrap();
        let statuses: Vec<Option<MessageStatus>> = events
            .iter()
            .map(|e| match e {
                NormalizedEvent::Receipt(r) => Some(r.status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                Some(MessageStatus::Delivered),
                Some(MessageStatus::Read),
                Some(MessageStatus::Failed),
                Some(MessageStatus::Sent),
                None,
                None,
            ]
        );
        let NormalizedEvent::Receipt(failed) = &events[2] else {
            panic!("expected receipt");
        };
        assert!(failed.error.is_some());
    }
}
