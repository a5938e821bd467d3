// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound message pipeline.
//!
//! `PENDING -> SENT -> DELIVERED -> READ`, with `FAILED` reachable from
//! PENDING or SENT. A send request is accepted by persisting a PENDING
//! message plus its outbox job; attempts happen afterwards, either on the
//! [`OutboxWorker`](crate::outbox::OutboxWorker) or inline for campaigns.
//! Every attempt holds the per-message lock, so one adapter call at most is
//! in flight for any message.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parley_core::types::{
    Conversation, DeliveryReceipt, Direction, MediaRef, MediaSource, Message, MessageStatus,
    MessageType, OutboundPayload, SendContext, timestamp_after, timestamp_now,
};
use parley_core::{ChannelAdapter, ChannelError, EventType, ParleyError};
use parley_resilience::{BackoffPolicy, ChannelHealthRegistry};
use parley_storage::queries::{contacts, conversations, media, messages, outbox};
use parley_storage::{Database, MediaBlob, NewOutbound, ReceiptOutcome};
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::locks::MessageLocks;
use crate::metrics;
use crate::notify::Notifier;
use crate::parked::ParkedReceipts;
use crate::registry::AdapterRegistry;

/// A send request from an agent or API client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default, alias = "mimetype")]
    pub mime_type: Option<String>,
    /// Uploaded bytes, kept in the media store.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    /// The message is no longer PENDING.
    Settled(Message),
    /// A retryable failure was recorded; the next attempt is due after `delay`.
    Retry { message: Message, delay: Duration },
}

impl Attempt {
    pub fn message(&self) -> &Message {
        match self {
            Self::Settled(message) | Self::Retry { message, .. } => message,
        }
    }
}

/// Who owns the outbox job between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptMode {
    /// The outbox worker picks the job up again when it is due.
    Background,
    /// The caller sleeps and retries itself; the job stays claimed.
    Inline,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub policy: BackoffPolicy,
    pub send_timeout: Duration,
    pub lock_timeout: Duration,
    pub max_inline_bytes: usize,
}

impl PipelineOptions {
    pub fn from_config(config: &parley_config::model::ParleyConfig) -> Self {
        Self {
            policy: BackoffPolicy::from_pipeline(&config.pipeline),
            send_timeout: config.pipeline.send_timeout(),
            lock_timeout: Duration::from_secs(config.pipeline.lock_timeout_secs),
            max_inline_bytes: config.media.max_inline_bytes,
        }
    }
}

#[derive(Clone)]
pub struct MessagePipeline {
    db: Database,
    notifier: Notifier,
    registry: Arc<AdapterRegistry>,
    health: Arc<ChannelHealthRegistry>,
    locks: MessageLocks,
    options: PipelineOptions,
    wake: Arc<Notify>,
    parked: ParkedReceipts,
}

impl MessagePipeline {
    pub fn new(
        db: Database,
        notifier: Notifier,
        registry: Arc<AdapterRegistry>,
        health: Arc<ChannelHealthRegistry>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            db,
            notifier,
            registry,
            health,
            locks: MessageLocks::new(),
            options,
            wake: Arc::new(Notify::new()),
            parked: ParkedReceipts::default(),
        }
    }

    /// Signalled whenever new work is enqueued.
    pub fn wake_handle(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn locks(&self) -> &MessageLocks {
        &self.locks
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.options.policy
    }

    /// Largest media payload stored inline, in bytes.
    pub fn max_inline_bytes(&self) -> usize {
        self.options.max_inline_bytes
    }

    /// Validate and accept a send request.
    ///
    /// Returns the PENDING message; delivery happens asynchronously. Nothing
    /// is written when validation fails.
    pub async fn submit(
        &self,
        request: SendRequest,
        sender_user_id: Option<&str>,
    ) -> Result<Message, ParleyError> {
        let conversation = conversations::get_conversation(&self.db, &request.conversation_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", &request.conversation_id))?;
        let adapter = self.registry.require(&conversation.channel_id)?;
        let (message, blob) = self.build_message(&conversation, &*adapter, request, sender_user_id)?;

        messages::insert_outbound(
            &self.db,
            NewOutbound {
                message: message.clone(),
                recipient_id: None,
                blob,
                claimed_until: None,
            },
        )
        .await?;
        info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            channel_id = %message.channel_id,
            kind = %message.message_type,
            "message accepted"
        );
        self.notifier.new_message(&message);
        self.notifier.conversation_updated(&conversation);
        self.wake.notify_one();
        Ok(message)
    }

    /// Create a campaign message whose outbox job is owned by the caller.
    ///
    /// The caller is expected to [`drive`](Self::drive) it; should the caller
    /// die, the job lock expires and the outbox worker takes over.
    pub async fn enqueue_campaign_message(
        &self,
        conversation: &Conversation,
        campaign_id: &str,
        recipient_id: &str,
        body: String,
    ) -> Result<Message, ParleyError> {
        let adapter = self.registry.require(&conversation.channel_id)?;
        let request = SendRequest {
            conversation_id: conversation.id.clone(),
            content: Some(body),
            message_type: Some(MessageType::Text),
            ..SendRequest::default()
        };
        let (mut message, _) = self.build_message(conversation, &*adapter, request, None)?;
        message.campaign_id = Some(campaign_id.to_string());

        messages::insert_outbound(
            &self.db,
            NewOutbound {
                message: message.clone(),
                recipient_id: Some(recipient_id.to_string()),
                blob: None,
                claimed_until: Some(timestamp_after(self.options.lock_timeout)),
            },
        )
        .await?;
        debug!(message_id = %message.id, %campaign_id, %recipient_id, "campaign message enqueued");
        self.notifier.new_message(&message);
        self.notifier.conversation_updated(conversation);
        Ok(message)
    }

    /// Attempt `message_id` repeatedly, sleeping through backoff, until it settles.
    pub async fn drive(&self, message_id: &str) -> Result<Message, ParleyError> {
        loop {
            match self.attempt(message_id, AttemptMode::Inline).await? {
                Attempt::Settled(message) => return Ok(message),
                Attempt::Retry { delay, .. } => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Trigger an immediate attempt for a PENDING message.
    ///
    /// Messages past PENDING are returned unchanged.
    pub async fn resend(&self, message_id: &str) -> Result<Message, ParleyError> {
        let message = messages::get_message(&self.db, message_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("message", message_id))?;
        if message.direction != Direction::Outbound || message.status != MessageStatus::Pending {
            debug!(%message_id, status = %message.status, "resend ignored");
            return Ok(message);
        }
        outbox::make_due(&self.db, message_id).await?;
        info!(%message_id, "manual resend");
        let attempt = self.attempt(message_id, AttemptMode::Background).await?;
        Ok(attempt.message().clone())
    }

    /// Perform one send attempt under the message lock.
    pub async fn attempt(&self, message_id: &str, mode: AttemptMode) -> Result<Attempt, ParleyError> {
        let _guard = self.locks.acquire(message_id).await;

        let message = messages::get_message(&self.db, message_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("message", message_id))?;
        if message.status != MessageStatus::Pending {
            outbox::complete(&self.db, message_id).await?;
            return Ok(Attempt::Settled(message));
        }

        let Some(adapter) = self.registry.get(&message.channel_id) else {
            return self
                .fail(&message, "channel is not configured", "unknown_channel")
                .await;
        };
        if let Some(reason) = self.health.degraded_reason(&message.channel_id) {
            let err = ParleyError::ChannelAuth {
                channel_id: message.channel_id.clone(),
                message: reason,
            };
            return self.fail(&message, &err.to_string(), "degraded").await;
        }

        let (ctx, payload) = match self.prepare(&message).await {
            Ok(prepared) => prepared,
            Err(e) => return self.fail(&message, &e.to_string(), "invalid").await,
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.options.send_timeout, adapter.send(&ctx, &payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Transient(format!(
                "send timed out after {:?}",
                self.options.send_timeout
            ))),
        };
        metrics::record_send_latency(started.elapsed().as_secs_f64());

        match result {
            Ok(sent) => self.on_sent(&message, sent).await,
            Err(ChannelError::Auth(reason)) => {
                self.health.mark_degraded(&message.channel_id, &reason);
                let err = ParleyError::ChannelAuth {
                    channel_id: message.channel_id.clone(),
                    message: reason,
                };
                error!(message_id = %message.id, error = %err, "channel credentials rejected");
                self.fail(&message, &err.to_string(), "auth").await
            }
            Err(e) if e.is_retryable() => self.on_retryable(&message, e, mode).await,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "send rejected");
                self.fail(&message, &e.to_string(), "rejected").await
            }
        }
    }

    /// Correlate a delivery receipt. Stale and duplicate receipts are no-ops.
    ///
    /// A receipt for a provider id not yet recorded is parked and replayed
    /// when the matching send is marked SENT.
    pub async fn apply_receipt(&self, receipt: &DeliveryReceipt) -> Result<ReceiptOutcome, ParleyError> {
        let outcome = self.store_receipt(receipt).await?;
        if !matches!(outcome, ReceiptOutcome::Unknown) {
            return Ok(outcome);
        }
        if !self.parked.park(receipt) {
            debug!(
                channel_id = %receipt.channel_id,
                provider_message_id = %receipt.provider_message_id,
                "receipt for unknown message dropped"
            );
            return Ok(outcome);
        }
        debug!(
            channel_id = %receipt.channel_id,
            provider_message_id = %receipt.provider_message_id,
            "receipt parked until its send is recorded"
        );
        // Parked before this lookup, so a send recorded after it finds the receipt.
        let recorded = messages::get_message_by_provider_id(
            &self.db,
            &receipt.channel_id,
            &receipt.provider_message_id,
        )
        .await?;
        if recorded.is_none() {
            return Ok(outcome);
        }
        Ok(self
            .replay_parked(&receipt.channel_id, &receipt.provider_message_id)
            .await
            .unwrap_or(outcome))
    }

    /// Apply receipts parked for a provider message. Returns the last outcome.
    async fn replay_parked(
        &self,
        channel_id: &str,
        provider_message_id: &str,
    ) -> Option<ReceiptOutcome> {
        let mut last = None;
        for receipt in self.parked.take(channel_id, provider_message_id) {
            match self.store_receipt(&receipt).await {
                Ok(outcome) => last = Some(outcome),
                Err(e) => warn!(
                    channel_id,
                    provider_message_id,
                    error = %e,
                    "parked receipt could not be applied"
                ),
            }
        }
        last
    }

    pub fn parked_receipts(&self) -> &ParkedReceipts {
        &self.parked
    }

    async fn store_receipt(&self, receipt: &DeliveryReceipt) -> Result<ReceiptOutcome, ParleyError> {
        let outcome = messages::apply_receipt(
            &self.db,
            &receipt.channel_id,
            &receipt.provider_message_id,
            receipt.status,
            receipt.error.as_deref(),
        )
        .await?;
        match &outcome {
            ReceiptOutcome::Applied { message, previous } => {
                debug!(
                    message_id = %message.id,
                    from = %previous,
                    to = %message.status,
                    "receipt applied"
                );
                self.notifier.message_status(message);
            }
            ReceiptOutcome::Ignored(message) => {
                debug!(
                    message_id = %message.id,
                    current = %message.status,
                    reported = %receipt.status,
                    "stale receipt ignored"
                );
            }
            ReceiptOutcome::Unknown => {
                debug!(
                    channel_id = %receipt.channel_id,
                    provider_message_id = %receipt.provider_message_id,
                    "receipt for unknown message"
                );
            }
        }
        Ok(outcome)
    }

    pub async fn get(&self, message_id: &str) -> Result<Message, ParleyError> {
        messages::get_message(&self.db, message_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("message", message_id))
    }

    fn build_message(
        &self,
        conversation: &Conversation,
        adapter: &dyn ChannelAdapter,
        request: SendRequest,
        sender_user_id: Option<&str>,
    ) -> Result<(Message, Option<MediaBlob>), ParleyError> {
        let caps = adapter.capabilities();
        let has_media = request.media_url.is_some() || request.data.is_some();
        let kind = match request.message_type {
            Some(kind) => kind,
            None if has_media => request
                .mime_type
                .as_deref()
                .map(MessageType::from_mime)
                .unwrap_or(MessageType::Document),
            None => MessageType::Text,
        };

        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp_now();
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

        let (content, media, blob) = if kind == MessageType::Text {
            if has_media {
                return Err(ParleyError::validation("text messages cannot carry media"));
            }
            let body = non_empty(request.content)
                .ok_or_else(|| ParleyError::validation("content is required for text messages"))?;
            if let Some(max) = caps.max_text_length
                && body.chars().count() > max
            {
                return Err(ParleyError::validation(format!(
                    "content exceeds {max} characters"
                )));
            }
            (Some(body), None, None)
        } else {
            let supported = match kind {
                MessageType::Image => caps.supports_images,
                MessageType::Video => caps.supports_video,
                MessageType::Audio => caps.supports_audio,
                _ => caps.supports_documents,
            };
            if !supported {
                return Err(ParleyError::validation(format!(
                    "channel {} does not accept {kind} messages",
                    conversation.channel_id
                )));
            }
            let media_url = non_empty(request.media_url);
            if media_url.is_none() && request.data.is_none() {
                return Err(ParleyError::validation(
                    "media messages need a mediaUrl or uploaded data",
                ));
            }
            if let Some(data) = &request.data
                && data.len() > self.options.max_inline_bytes
            {
                return Err(ParleyError::validation(format!(
                    "upload exceeds {} bytes",
                    self.options.max_inline_bytes
                )));
            }
            let file_name = non_empty(request.file_name);
            let mime_type = non_empty(request.mime_type)
                .or_else(|| guess_mime(file_name.as_deref().or(media_url.as_deref())))
                .or_else(|| (kind == MessageType::Document).then(|| "application/octet-stream".into()))
                .ok_or_else(|| ParleyError::validation("mimetype is required for this media"))?;

            let blob = request.data.map(|data| MediaBlob {
                message_id: id.clone(),
                mime_type: mime_type.clone(),
                file_name: file_name.clone(),
                data,
            });
            let media = MediaRef {
                url: media_url,
                mime_type,
                file_name,
                duration_secs: None,
                file_length: blob.as_ref().map(|b| b.data.len() as u64),
                stored: blob.is_some(),
            };
            (non_empty(request.caption).or(non_empty(request.content)), Some(media), blob)
        };

        let message = Message {
            id,
            conversation_id: conversation.id.clone(),
            channel_id: conversation.channel_id.clone(),
            direction: Direction::Outbound,
            message_type: kind,
            content,
            status: MessageStatus::Pending,
            sender_user_id: sender_user_id.map(str::to_string),
            provider_message_id: None,
            media,
            campaign_id: None,
            error: None,
            retry_count: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        Ok((message, blob))
    }

    /// Resolve the recipient and shape the canonical payload.
    async fn prepare(&self, message: &Message) -> Result<(SendContext, OutboundPayload), ParleyError> {
        let conversation = conversations::get_conversation(&self.db, &message.conversation_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", &message.conversation_id))?;
        let contact = contacts::get_contact(&self.db, &conversation.contact_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("contact", &conversation.contact_id))?;

        let payload = match &message.media {
            None => OutboundPayload::Text {
                body: message.content.clone().unwrap_or_default(),
            },
            Some(media_ref) => {
                let source = if media_ref.stored {
                    let blob = media::get_media(&self.db, &message.id)
                        .await?
                        .ok_or_else(|| ParleyError::not_found("media", &message.id))?;
                    MediaSource::Bytes(blob.data)
                } else {
                    let url = media_ref.url.clone().ok_or_else(|| {
                        ParleyError::validation("media message has neither stored bytes nor a URL")
                    })?;
                    MediaSource::Url(url)
                };
                OutboundPayload::Media {
                    kind: message.message_type,
                    source,
                    mime_type: media_ref.mime_type.clone(),
                    file_name: media_ref.file_name.clone(),
                    caption: message.content.clone(),
                }
            }
        };

        let ctx = SendContext {
            channel_id: message.channel_id.clone(),
            conversation_id: message.conversation_id.clone(),
            message_id: message.id.clone(),
            recipient: contact.channel_identifier,
        };
        Ok((ctx, payload))
    }

    async fn on_sent(
        &self,
        message: &Message,
        sent: parley_core::types::ProviderSendResult,
    ) -> Result<Attempt, ParleyError> {
        let status = if sent.status.is_sent() {
            sent.status
        } else {
            MessageStatus::Sent
        };
        let Some(updated) =
            messages::mark_sent(&self.db, &message.id, sent.provider_message_id.as_str(), status).await?
        else {
            return self.settled(&message.id).await;
        };
        info!(
            message_id = %updated.id,
            channel_id = %updated.channel_id,
            provider_message_id = %sent.provider_message_id,
            "message sent"
        );
        metrics::record_sent(&updated.channel_id);
        self.notifier
            .domain(EventType::MessageSent, &updated.channel_id, &updated)
            .await;
        self.notifier.message_status(&updated);
        if self
            .replay_parked(&updated.channel_id, sent.provider_message_id.as_str())
            .await
            .is_some()
        {
            return self.settled(&updated.id).await;
        }
        Ok(Attempt::Settled(updated))
    }

    async fn on_retryable(
        &self,
        message: &Message,
        err: ChannelError,
        mode: AttemptMode,
    ) -> Result<Attempt, ParleyError> {
        let attempts_made = u32::try_from(message.retry_count + 1).unwrap_or(u32::MAX);
        if !self.options.policy.allows_retry(attempts_made) {
            let exhausted = ParleyError::ChannelTransient {
                channel_id: message.channel_id.clone(),
                message: format!("{err} (gave up after {attempts_made} attempts)"),
            };
            error!(message_id = %message.id, attempts = attempts_made, error = %err, "send retries exhausted");
            return self.fail(message, &exhausted.to_string(), "exhausted").await;
        }

        let delay = self
            .options
            .policy
            .delay_with_hint(attempts_made, err.retry_after());
        let next_attempt_at = timestamp_after(delay);
        let hold_until = match mode {
            AttemptMode::Inline => Some(timestamp_after(delay + self.options.lock_timeout)),
            AttemptMode::Background => None,
        };
        warn!(
            message_id = %message.id,
            attempt = attempts_made,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "send failed, retrying"
        );
        match messages::record_retry(
            &self.db,
            &message.id,
            &err.to_string(),
            &next_attempt_at,
            hold_until.as_deref(),
        )
        .await?
        {
            Some(updated) => {
                metrics::record_retry(&updated.channel_id);
                Ok(Attempt::Retry {
                    message: updated,
                    delay,
                })
            }
            None => self.settled(&message.id).await,
        }
    }

    async fn fail(
        &self,
        message: &Message,
        reason: &str,
        metric_reason: &'static str,
    ) -> Result<Attempt, ParleyError> {
        let Some(failed) = messages::mark_failed(&self.db, &message.id, reason).await? else {
            return self.settled(&message.id).await;
        };
        info!(message_id = %failed.id, reason, "message failed");
        metrics::record_failed(&failed.channel_id, metric_reason);
        self.notifier.message_status(&failed);
        Ok(Attempt::Settled(failed))
    }

    async fn settled(&self, message_id: &str) -> Result<Attempt, ParleyError> {
        self.get(message_id).await.map(Attempt::Settled)
    }
}

/// Best-effort MIME type from a file name or URL extension.
fn guess_mime(name: Option<&str>) -> Option<String> {
    let name = name?.split(['?', '#']).next()?;
    let (_, ext) = name.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "webm" => "audio/webm",
        "ogg" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "amr" => "audio/amr",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => return None,
    };
    Some(mime.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_bus::EventBus;
    use parley_core::types::ChannelCapabilities;
    use parley_test_utils::MockChannel;

    use super::*;
    use crate::conversations::ConversationManager;
    use crate::identity::IdentityResolver;

    struct Fixture {
        pipeline: MessagePipeline,
        conversations: ConversationManager,
        channel: Arc<MockChannel>,
        health: Arc<ChannelHealthRegistry>,
        bus: Arc<EventBus>,
        _dir: tempfile::TempDir,
    }

    async fn fixture_with(channel: MockChannel, max_attempts: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let bus = Arc::new(EventBus::default());
        let notifier = Notifier::new(bus.clone());
        let channel = Arc::new(channel);
        let mut registry = AdapterRegistry::new();
        registry.register(channel.clone()).unwrap();
        let health = Arc::new(ChannelHealthRegistry::new());
        let pipeline = MessagePipeline::new(
            db.clone(),
            notifier.clone(),
            Arc::new(registry),
            health.clone(),
            PipelineOptions {
                policy: BackoffPolicy::immediate(max_attempts),
                send_timeout: Duration::from_secs(5),
                lock_timeout: Duration::from_secs(60),
                max_inline_bytes: 1024,
            },
        );
        let identity = IdentityResolver::new(db.clone(), notifier.clone());
        let conversations = ConversationManager::new(db, notifier, identity);
        Fixture {
            pipeline,
            conversations,
            channel,
            health,
            bus,
            _dir: dir,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(MockChannel::new("wa"), 3).await
    }

    async fn text(f: &Fixture, body: &str) -> Message {
        let conv = f
            .conversations
            .start_from_phone("wa", "5511999990000")
            .await
            .unwrap();
        f.pipeline
            .submit(
                SendRequest {
                    conversation_id: conv.id,
                    content: Some(body.into()),
                    ..Default::default()
                },
                Some("agent-1"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn submit_returns_pending_and_attempt_sends() {
        let f = fixture().await;
        let mut events = f.bus.subscribe_domain().await;
        let msg = text(&f, "hello").await;
        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(msg.sender_user_id.as_deref(), Some("agent-1"));

        let sent = f.pipeline.drive(&msg.id).await.unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert!(sent.provider_message_id.is_some());
        assert_eq!(f.channel.call_count(), 1);
        let calls = f.channel.calls();
        assert_eq!(calls[0].ctx.recipient, "5511999990000@s.whatsapp.net");
        assert_eq!(
            calls[0].payload,
            OutboundPayload::Text {
                body: "hello".into()
            }
        );

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.event);
        }
        assert!(kinds.contains(&EventType::MessageSent));
    }

    #[tokio::test]
    async fn auth_error_fails_without_retry_and_degrades_channel() {
        let f = fixture().await;
        f.channel.push_err(ChannelError::Auth("token expired".into()));
        let msg = text(&f, "hi").await;

        let failed = f.pipeline.drive(&msg.id).await.unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.retry_count, 0);
        assert!(f.health.degraded_reason("wa").is_some());

        let next = text(&f, "again").await;
        let failed = f.pipeline.drive(&next.id).await.unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(f.channel.call_count(), 1);

        assert!(f.health.reset("wa"));
        let third = text(&f, "after reset").await;
        assert_eq!(
            f.pipeline.drive(&third.id).await.unwrap().status,
            MessageStatus::Sent
        );
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let f = fixture().await;
        f.channel.push_err(ChannelError::Transient("503".into()));
        f.channel.push_err(ChannelError::RateLimited {
            message: "slow down".into(),
            retry_after: None,
        });
        let msg = text(&f, "hi").await;

        let sent = f.pipeline.drive(&msg.id).await.unwrap();
        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(sent.retry_count, 2);
        assert_eq!(f.channel.call_count(), 3);
    }

    #[tokio::test]
    async fn retries_exhaust_into_failed() {
        let f = fixture().await;
        for _ in 0..3 {
            f.channel.push_err(ChannelError::Transient("down".into()));
        }
        let msg = text(&f, "hi").await;

        let failed = f.pipeline.drive(&msg.id).await.unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(f.channel.call_count(), 3);
        assert!(failed.error.unwrap().contains("gave up after 3 attempts"));
    }

    #[tokio::test]
    async fn permanent_rejection_fails_immediately() {
        let f = fixture().await;
        f.channel
            .push_err(ChannelError::PermanentRejection("invalid recipient".into()));
        let msg = text(&f, "hi").await;
        let failed = f.pipeline.drive(&msg.id).await.unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.retry_count, 0);
        assert_eq!(f.channel.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_adapter_times_out_as_transient() {
        let f = fixture_with(MockChannel::new("wa").with_delay(Duration::from_millis(200)), 1).await;
        let mut pipeline = f.pipeline.clone();
        pipeline.options.send_timeout = Duration::from_millis(20);
        let msg = text(&f, "hi").await;
        let failed = pipeline.drive(&msg.id).await.unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert!(failed.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn concurrent_attempts_send_once() {
        let f = fixture_with(MockChannel::new("wa").with_delay(Duration::from_millis(30)), 3).await;
        let msg = text(&f, "hi").await;
        let a = f.pipeline.attempt(&msg.id, AttemptMode::Background);
        let b = f.pipeline.resend(&msg.id);
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        assert_eq!(b.unwrap().status, MessageStatus::Sent);
        assert_eq!(f.channel.call_count(), 1);
        assert!(f.pipeline.locks().is_empty());
    }

    #[tokio::test]
    async fn resend_returns_non_pending_unchanged() {
        let f = fixture().await;
        let msg = text(&f, "hi").await;
        let sent = f.pipeline.drive(&msg.id).await.unwrap();
        let again = f.pipeline.resend(&msg.id).await.unwrap();
        assert_eq!(again.status, sent.status);
        assert_eq!(f.channel.call_count(), 1);
        assert!(matches!(
            f.pipeline.resend("missing").await,
            Err(ParleyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn receipts_only_move_forward() {
        let f = fixture().await;
        f.channel.push_ok("wamid.1");
        let msg = text(&f, "hi").await;
        f.pipeline.drive(&msg.id).await.unwrap();

        let receipt = |status| DeliveryReceipt {
            channel_id: "wa".into(),
            provider_message_id: "wamid.1".to_string(),
            status,
            error: None,
            timestamp: timestamp_now(),
        };
        assert!(matches!(
            f.pipeline.apply_receipt(&receipt(MessageStatus::Read)).await.unwrap(),
            ReceiptOutcome::Applied { .. }
        ));
        assert!(matches!(
            f.pipeline
                .apply_receipt(&receipt(MessageStatus::Delivered))
                .await
                .unwrap(),
            ReceiptOutcome::Ignored(_)
        ));
        assert_eq!(f.pipeline.get(&msg.id).await.unwrap().status, MessageStatus::Read);

        let unknown = DeliveryReceipt {
            provider_message_id: "other".to_string(),
            ..receipt(MessageStatus::Delivered)
        };
        assert_eq!(
            f.pipeline.apply_receipt(&unknown).await.unwrap(),
            ReceiptOutcome::Unknown
        );
        assert_eq!(f.pipeline.parked_receipts().len(), 1);
    }

    #[tokio::test]
    async fn receipt_ahead_of_mark_sent_is_replayed() {
        let f = fixture().await;
        f.channel.push_ok("wamid.early");
        let msg = text(&f, "hi").await;

        let early = DeliveryReceipt {
            channel_id: "wa".into(),
            provider_message_id: "wamid.early".to_string(),
            status: MessageStatus::Delivered,
            error: None,
            timestamp: timestamp_now(),
        };
        assert_eq!(
            f.pipeline.apply_receipt(&early).await.unwrap(),
            ReceiptOutcome::Unknown
        );
        assert_eq!(f.pipeline.parked_receipts().len(), 1);

        let settled = f.pipeline.drive(&msg.id).await.unwrap();
        assert_eq!(settled.status, MessageStatus::Delivered);
        assert_eq!(f.pipeline.get(&msg.id).await.unwrap().status, MessageStatus::Delivered);
        assert!(f.pipeline.parked_receipts().is_empty());
    }

    #[tokio::test]
    async fn validation_rejects_before_writing() {
        let f = fixture_with(
            MockChannel::new("wa").with_capabilities(ChannelCapabilities {
                supports_video: false,
                max_text_length: Some(5),
                ..MockChannel::default_capabilities()
            }),
            3,
        )
        .await;
        let conv = f
            .conversations
            .start_from_phone("wa", "5511999990000")
            .await
            .unwrap();
        let base = SendRequest {
            conversation_id: conv.id.clone(),
            ..Default::default()
        };

        let cases = [
            SendRequest { content: Some("   ".into()), ..base.clone() },
            SendRequest { content: Some("too long".into()), ..base.clone() },
            SendRequest { message_type: Some(MessageType::Image), ..base.clone() },
            SendRequest {
                message_type: Some(MessageType::Video),
                media_url: Some("https://cdn/x.mp4".into()),
                ..base.clone()
            },
            SendRequest {
                message_type: Some(MessageType::Image),
                data: Some(vec![0; 2048]),
                mime_type: Some("image/png".into()),
                ..base.clone()
            },
        ];
        for request in cases {
            assert!(matches!(
                f.pipeline.submit(request, None).await,
                Err(ParleyError::Validation(_))
            ));
        }
        assert!(f.conversations.messages(&conv.id, 50, 0).await.unwrap().is_empty());

        assert!(matches!(
            f.pipeline
                .submit(
                    SendRequest {
                        conversation_id: "missing".into(),
                        content: Some("x".into()),
                        ..Default::default()
                    },
                    None
                )
                .await,
            Err(ParleyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn uploaded_media_is_sent_as_bytes() {
        let f = fixture().await;
        let conv = f
            .conversations
            .start_from_phone("wa", "5511999990000")
            .await
            .unwrap();
        let msg = f
            .pipeline
            .submit(
                SendRequest {
                    conversation_id: conv.id,
                    caption: Some("look".into()),
                    file_name: Some("photo.png".into()),
                    data: Some(vec![1, 2, 3]),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(msg.message_type, MessageType::Image);
        let media_ref = msg.media.clone().unwrap();
        assert!(media_ref.stored);
        assert_eq!(media_ref.mime_type, "image/png");

        f.pipeline.drive(&msg.id).await.unwrap();
        let calls = f.channel.calls();
        match &calls[0].payload {
            OutboundPayload::Media {
                kind,
                source,
                caption,
                ..
            } => {
                assert_eq!(*kind, MessageType::Image);
                assert_eq!(*source, MediaSource::Bytes(vec![1, 2, 3]));
                assert_eq!(caption.as_deref(), Some("look"));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn guesses_mime_from_extension() {
        assert_eq!(guess_mime(Some("a/b/voice.OGG")).as_deref(), Some("audio/ogg"));
        assert_eq!(
            guess_mime(Some("https://cdn/x.pdf?sig=1")).as_deref(),
            Some("application/pdf")
        );
        assert_eq!(guess_mime(Some("noext")), None);
        assert_eq!(guess_mime(None), None);
    }
}
