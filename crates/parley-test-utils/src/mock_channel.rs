// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock channel adapter for deterministic testing.
//!
//! `MockChannel` implements `ChannelAdapter` with scripted send outcomes and
//! captures every send for assertion in tests. Inbound payloads use a small
//! JSON shape:
//!
//! ```json
//! { "messages": [{ "from": "5511...@s.whatsapp.net", "id": "P1", "text": "hi" }],
//!   "receipts": [{ "id": "prov-mock-1", "status": "DELIVERED" }] }
//! ```

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parley_core::traits::{ChannelAdapter, PluginAdapter};
use parley_core::types::{
    AdapterType, AudioTransport, ChannelCapabilities, ChannelKind, DeliveryReceipt, HealthStatus,
    InboundEvent, InboundMedia, MessageStatus, MessageType, NormalizedEvent, OutboundPayload,
    ProviderMessageId, ProviderSendResult, SendContext, timestamp_now,
};
use parley_core::{ChannelError, ParleyError};
use serde_json::Value;

/// One captured `send` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCall {
    pub ctx: SendContext,
    pub payload: OutboundPayload,
}

type Outcome = Result<ProviderSendResult, ChannelError>;

/// A scripted messaging channel.
///
/// Queued outcomes are consumed in order; once the queue is empty every send
/// succeeds with a generated `prov-mock-N` id. Per-recipient failures apply
/// to every send to that recipient regardless of the queue.
pub struct MockChannel {
    channel_id: String,
    kind: ChannelKind,
    capabilities: ChannelCapabilities,
    delay: Option<Duration>,
    signature: Option<String>,
    verify_token: Option<String>,
    outcomes: Mutex<VecDeque<Outcome>>,
    recipient_failures: Mutex<HashMap<String, ChannelError>>,
    calls: Mutex<Vec<SentCall>>,
    health: Mutex<HealthStatus>,
    counter: AtomicU64,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockChannel {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            kind: ChannelKind::Bridge,
            capabilities: Self::default_capabilities(),
            delay: None,
            signature: None,
            verify_token: None,
            outcomes: Mutex::new(VecDeque::new()),
            recipient_failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            health: Mutex::new(HealthStatus::Healthy),
            counter: AtomicU64::new(0),
        }
    }

    /// Everything supported, audio by URL, no text limit.
    pub fn default_capabilities() -> ChannelCapabilities {
        ChannelCapabilities {
            supports_images: true,
            supports_video: true,
            supports_audio: true,
            supports_documents: true,
            audio_transport: AudioTransport::Url,
            accepted_audio: Vec::new(),
            max_text_length: None,
        }
    }

    pub fn with_kind(mut self, kind: ChannelKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ChannelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sleep this long inside every `send`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Require inbound webhooks to carry exactly this signature.
    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = Some(signature.to_string());
        self
    }

    /// Accept subscription handshakes presenting this token.
    pub fn with_verify_token(mut self, token: &str) -> Self {
        self.verify_token = Some(token.to_string());
        self
    }

    /// Queue a successful send with a fixed provider id.
    pub fn push_ok(&self, provider_message_id: &str) {
        locked(&self.outcomes).push_back(Ok(ProviderSendResult {
            provider_message_id: ProviderMessageId(provider_message_id.to_string()),
            status: MessageStatus::Sent,
        }));
    }

    /// Queue a failed send.
    pub fn push_err(&self, error: ChannelError) {
        locked(&self.outcomes).push_back(Err(error));
    }

    /// Fail every send to `recipient` (a channel identifier) with `error`.
    pub fn fail_recipient(&self, recipient: &str, error: ChannelError) {
        locked(&self.recipient_failures).insert(recipient.to_string(), error);
    }

    pub fn set_health(&self, status: HealthStatus) {
        *locked(&self.health) = status;
    }

    pub fn calls(&self) -> Vec<SentCall> {
        locked(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.calls).len()
    }

    /// Recipients of every captured send, in call order.
    pub fn recipients(&self) -> Vec<String> {
        locked(&self.calls)
            .iter()
            .map(|c| c.ctx.recipient.clone())
            .collect()
    }

    pub fn clear_calls(&self) {
        locked(&self.calls).clear();
    }

    fn next_outcome(&self, recipient: &str) -> Outcome {
        if let Some(err) = locked(&self.recipient_failures).get(recipient) {
            return Err(err.clone());
        }
        if let Some(outcome) = locked(&self.outcomes).pop_front() {
            return outcome;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderSendResult {
            provider_message_id: ProviderMessageId(format!("prov-mock-{n}")),
            status: MessageStatus::Sent,
        })
    }

    fn parse_message(&self, item: &Value) -> Result<NormalizedEvent, ParleyError> {
        let field = |name: &str| item.get(name).and_then(Value::as_str).map(str::to_string);
        let (Some(from), Some(id)) = (field("from"), field("id")) else {
            return Ok(NormalizedEvent::Ignored {
                reason: "message without from/id".into(),
            });
        };
        let message_type = match field("type") {
            Some(t) => MessageType::from_str(&t.to_ascii_uppercase())
                .map_err(|e| ParleyError::validation(format!("unknown message type {t}: {e}")))?,
            None => MessageType::Text,
        };
        let media = message_type.is_media().then(|| InboundMedia {
            mime_type: field("mime").unwrap_or_else(|| "application/octet-stream".into()),
            url: field("url"),
            data: field("data").map(String::into_bytes),
            file_name: field("fileName"),
            duration_secs: None,
            file_length: None,
        });
        Ok(NormalizedEvent::Message(InboundEvent {
            channel_id: self.channel_id.clone(),
            raw_identifier: from,
            observed_phone: field("phone"),
            alt_identifier: field("alt"),
            display_name: field("name"),
            message_type,
            content: field("text"),
            media,
            provider_message_id: id,
            timestamp: timestamp_now(),
        }))
    }

    fn parse_receipt(&self, item: &Value) -> Result<NormalizedEvent, ParleyError> {
        let field = |name: &str| item.get(name).and_then(Value::as_str).map(str::to_string);
        let (Some(id), Some(status)) = (field("id"), field("status")) else {
            return Ok(NormalizedEvent::Ignored {
                reason: "receipt without id/status".into(),
            });
        };
        let status = MessageStatus::from_str(&status.to_ascii_uppercase())
            .map_err(|e| ParleyError::validation(format!("unknown status {status}: {e}")))?;
        Ok(NormalizedEvent::Receipt(DeliveryReceipt {
            channel_id: self.channel_id.clone(),
            provider_message_id: id,
            status,
            error: field("error"),
            timestamp: timestamp_now(),
        }))
    }
}

#[async_trait]
impl PluginAdapter for MockChannel {
    fn name(&self) -> &str {
        "mock-channel"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Channel
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(locked(&self.health).clone())
    }

    async fn shutdown(&self) -> Result<(), ParleyError> {
        Ok(())
    }
}

#[async_trait]
impl ChannelAdapter for MockChannel {
    fn channel_id(&self) -> &str {
        &self.channel_id
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn capabilities(&self) -> ChannelCapabilities {
        self.capabilities.clone()
    }

    async fn send(
        &self,
        ctx: &SendContext,
        payload: &OutboundPayload,
    ) -> Result<ProviderSendResult, ChannelError> {
        locked(&self.calls).push(SentCall {
            ctx: ctx.clone(),
            payload: payload.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next_outcome(&ctx.recipient)
    }

    fn normalize_inbound(&self, raw: &Value) -> Result<Vec<NormalizedEvent>, ParleyError> {
        let messages = raw.get("messages").and_then(Value::as_array);
        let receipts = raw.get("receipts").and_then(Value::as_array);
        if messages.is_none() && receipts.is_none() {
            return Err(ParleyError::Channel {
                message: "mock payload has neither messages nor receipts".into(),
                source: None,
            });
        }
        let mut events = Vec::new();
        for item in messages.into_iter().flatten() {
            events.push(self.parse_message(item)?);
        }
        for item in receipts.into_iter().flatten() {
            events.push(self.parse_receipt(item)?);
        }
        Ok(events)
    }

    fn verify_inbound(&self, signature: Option<&str>, _body: &[u8]) -> Result<(), ParleyError> {
        match &self.signature {
            Some(expected) if signature != Some(expected.as_str()) => Err(ParleyError::Channel {
                message: "webhook signature mismatch".into(),
                source: None,
            }),
            _ => Ok(()),
        }
    }

    fn verify_subscription(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        let expected = self.verify_token.as_deref()?;
        (mode == "subscribe" && token == expected).then(|| challenge.to_string())
    }
}
