// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider webhook intake.
//!
//! Verifies and normalizes a raw provider payload, then routes each event:
//! messages through identity resolution into their conversation, receipts
//! into the pipeline's monotonic status guard.

use std::sync::Arc;

use parley_core::types::{
    Direction, InboundEvent, MediaRef, Message, MessageStatus, NormalizedEvent, timestamp_now,
};
use parley_core::{EventType, ParleyError};
use parley_storage::queries::messages;
use parley_storage::{Database, MediaBlob};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::conversations::ConversationManager;
use crate::identity::{IdentityResolver, Sighting};
use crate::metrics;
use crate::notify::Notifier;
use crate::pipeline::MessagePipeline;
use crate::registry::AdapterRegistry;

/// What one webhook delivery contained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InboundSummary {
    pub received: usize,
    pub duplicates: usize,
    pub receipts: usize,
    pub ignored: usize,
}

#[derive(Clone)]
pub struct InboundProcessor {
    db: Database,
    notifier: Notifier,
    registry: Arc<AdapterRegistry>,
    identity: IdentityResolver,
    conversations: ConversationManager,
    pipeline: MessagePipeline,
    max_inline_bytes: usize,
}

impl InboundProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        notifier: Notifier,
        registry: Arc<AdapterRegistry>,
        identity: IdentityResolver,
        conversations: ConversationManager,
        pipeline: MessagePipeline,
        max_inline_bytes: usize,
    ) -> Self {
        Self {
            db,
            notifier,
            registry,
            identity,
            conversations,
            pipeline,
            max_inline_bytes,
        }
    }

    /// Answer a provider subscription handshake for `channel_id`.
    pub fn verify_subscription(
        &self,
        channel_id: &str,
        mode: &str,
        token: &str,
        challenge: &str,
    ) -> Result<String, ParleyError> {
        let adapter = self
            .registry
            .get(channel_id)
            .ok_or_else(|| ParleyError::not_found("channel", channel_id))?;
        adapter
            .verify_subscription(mode, token, challenge)
            .ok_or_else(|| ParleyError::Channel {
                message: format!("subscription verification failed for {channel_id}"),
                source: None,
            })
    }

    /// Verify, parse, and process a raw webhook body.
    pub async fn handle_webhook(
        &self,
        channel_id: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<InboundSummary, ParleyError> {
        let adapter = self
            .registry
            .get(channel_id)
            .ok_or_else(|| ParleyError::not_found("channel", channel_id))?;
        adapter.verify_inbound(signature, body)?;
        let raw: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ParleyError::validation(format!("webhook body is not JSON: {e}")))?;
        let events = adapter.normalize_inbound(&raw)?;
        self.process(channel_id, events).await
    }

    /// Process already-normalized events in order.
    ///
    /// A failing event is logged and skipped so one bad item does not drop
    /// the rest of the batch.
    pub async fn process(
        &self,
        channel_id: &str,
        events: Vec<NormalizedEvent>,
    ) -> Result<InboundSummary, ParleyError> {
        let mut summary = InboundSummary::default();
        for event in events {
            match event {
                NormalizedEvent::Message(inbound) => match self.receive(inbound).await {
                    Ok(Some(_)) => {
                        summary.received += 1;
                        metrics::record_inbound(channel_id, "message");
                    }
                    Ok(None) => {
                        summary.duplicates += 1;
                        metrics::record_inbound(channel_id, "duplicate");
                    }
                    Err(e) => {
                        warn!(%channel_id, error = %e, "inbound message dropped");
                        summary.ignored += 1;
                    }
                },
                NormalizedEvent::Receipt(receipt) => {
                    match self.pipeline.apply_receipt(&receipt).await {
                        Ok(_) => {
                            summary.receipts += 1;
                            metrics::record_inbound(channel_id, "receipt");
                        }
                        Err(e) => warn!(%channel_id, error = %e, "receipt dropped"),
                    }
                }
                NormalizedEvent::Ignored { reason } => {
                    debug!(%channel_id, %reason, "inbound event ignored");
                    summary.ignored += 1;
                    metrics::record_inbound(channel_id, "ignored");
                }
            }
        }
        Ok(summary)
    }

    /// Store one inbound message. Returns `None` for a replayed provider id.
    pub async fn receive(&self, event: InboundEvent) -> Result<Option<Message>, ParleyError> {
        if messages::get_message_by_provider_id(&self.db, &event.channel_id, &event.provider_message_id)
            .await?
            .is_some()
        {
            debug!(
                channel_id = %event.channel_id,
                provider_message_id = %event.provider_message_id,
                "duplicate inbound message"
            );
            return Ok(None);
        }

        let contact = self
            .identity
            .resolve_sighting(
                &event.channel_id,
                Sighting {
                    raw_identifier: &event.raw_identifier,
                    observed_phone: event.observed_phone.as_deref(),
                    alt_identifier: event.alt_identifier.as_deref(),
                    display_name: event.display_name.as_deref(),
                },
            )
            .await?;
        let conversation = self.conversations.open_or_get(&contact).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp_now();
        let (media, blob) = match event.media {
            Some(inbound) => {
                let blob = inbound
                    .data
                    .filter(|data| {
                        let fits = data.len() <= self.max_inline_bytes;
                        if !fits {
                            warn!(message_id = %id, bytes = data.len(), "inline media too large to store");
                        }
                        fits
                    })
                    .map(|data| MediaBlob {
                        message_id: id.clone(),
                        mime_type: inbound.mime_type.clone(),
                        file_name: inbound.file_name.clone(),
                        data,
                    });
                let media = MediaRef {
                    url: inbound.url,
                    mime_type: inbound.mime_type,
                    file_name: inbound.file_name,
                    duration_secs: inbound.duration_secs,
                    file_length: inbound.file_length,
                    stored: blob.is_some(),
                };
                (Some(media), blob)
            }
            None => (None, None),
        };

        let message = Message {
            id,
            conversation_id: conversation.id.clone(),
            channel_id: event.channel_id.clone(),
            direction: Direction::Inbound,
            message_type: event.message_type,
            content: event.content,
            status: MessageStatus::Received,
            sender_user_id: None,
            provider_message_id: Some(event.provider_message_id),
            media,
            campaign_id: None,
            error: None,
            retry_count: 0,
            created_at: now.clone(),
            updated_at: now,
        };

        let Some(conversation) = messages::insert_inbound(&self.db, &message, blob).await? else {
            debug!(message_id = %message.id, "inbound message raced with a replay");
            return Ok(None);
        };
        info!(
            message_id = %message.id,
            conversation_id = %conversation.id,
            contact_id = %contact.id,
            unread = conversation.unread_count,
            "message received"
        );
        self.notifier
            .domain(EventType::MessageReceived, &message.channel_id, &message)
            .await;
        self.notifier.new_message(&message);
        self.notifier.conversation_updated(&conversation);
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use parley_bus::EventBus;
    use parley_core::types::{InboundMedia, MessageType};
    use parley_resilience::{BackoffPolicy, ChannelHealthRegistry};
    use parley_storage::queries::media;
    use parley_test_utils::MockChannel;
    use serde_json::json;

    use super::*;
    use crate::pipeline::PipelineOptions;

    struct Fixture {
        inbound: InboundProcessor,
        conversations: ConversationManager,
        bus: Arc<EventBus>,
        db: Database,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let bus = Arc::new(EventBus::default());
        let notifier = Notifier::new(bus.clone());
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(MockChannel::new("wa"))).unwrap();
        let registry = Arc::new(registry);
        let identity = IdentityResolver::new(db.clone(), notifier.clone());
        let conversations = ConversationManager::new(db.clone(), notifier.clone(), identity.clone());
        let pipeline = MessagePipeline::new(
            db.clone(),
            notifier.clone(),
            registry.clone(),
            Arc::new(ChannelHealthRegistry::new()),
            PipelineOptions {
                policy: BackoffPolicy::immediate(1),
                send_timeout: std::time::Duration::from_secs(5),
                lock_timeout: std::time::Duration::from_secs(60),
                max_inline_bytes: 16,
            },
        );
        let inbound = InboundProcessor::new(
            db.clone(),
            notifier,
            registry,
            identity,
            conversations.clone(),
            pipeline,
            16,
        );
        Fixture {
            inbound,
            conversations,
            bus,
            db,
            _dir: dir,
        }
    }

    fn text_event(from: &str, provider_id: &str) -> InboundEvent {
        InboundEvent {
            channel_id: "wa".into(),
            raw_identifier: from.into(),
            observed_phone: None,
            alt_identifier: None,
            display_name: Some("Ana".into()),
            message_type: MessageType::Text,
            content: Some("oi".into()),
            media: None,
            provider_message_id: provider_id.into(),
            timestamp: timestamp_now(),
        }
    }

    #[tokio::test]
    async fn inbound_message_bumps_unread_and_emits_events() {
        let f = fixture().await;
        let mut events = f.bus.subscribe_domain().await;

        let msg = f
            .inbound
            .receive(text_event("5511999990000@s.whatsapp.net", "P1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Received);
        assert_eq!(msg.direction, Direction::Inbound);

        let conv = f.conversations.get(&msg.conversation_id).await.unwrap();
        assert_eq!(conv.unread_count, 1);
        assert!(conv.last_message_at.is_some());

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.event);
        }
        assert_eq!(
            kinds,
            vec![
                EventType::ContactCreated,
                EventType::ConversationCreated,
                EventType::MessageReceived
            ]
        );
    }

    #[tokio::test]
    async fn replayed_provider_id_is_a_no_op() {
        let f = fixture().await;
        let event = text_event("5511999990000@s.whatsapp.net", "P1");
        assert!(f.inbound.receive(event.clone()).await.unwrap().is_some());
        assert!(f.inbound.receive(event).await.unwrap().is_none());

        let summary = f
            .inbound
            .process(
                "wa",
                vec![
                    NormalizedEvent::Message(text_event("5511999990000@s.whatsapp.net", "P1")),
                    NormalizedEvent::Message(text_event("5511999990000@s.whatsapp.net", "P2")),
                    NormalizedEvent::Ignored {
                        reason: "group".into(),
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            summary,
            InboundSummary {
                received: 1,
                duplicates: 1,
                receipts: 0,
                ignored: 1
            }
        );
        let conv = f
            .conversations
            .start_from_phone("wa", "5511999990000")
            .await
            .unwrap();
        assert_eq!(conv.unread_count, 2);
    }

    #[tokio::test]
    async fn inline_media_is_stored_when_small_enough() {
        let f = fixture().await;
        let mut small = text_event("5511999990000@s.whatsapp.net", "M1");
        small.message_type = MessageType::Image;
        small.content = None;
        small.media = Some(InboundMedia {
            mime_type: "image/jpeg".into(),
            url: Some("https://provider/m1".into()),
            data: Some(vec![9; 8]),
            ..Default::default()
        });
        let msg = f.inbound.receive(small).await.unwrap().unwrap();
        assert!(msg.media.as_ref().unwrap().stored);
        let blob = media::get_media(&f.db, &msg.id).await.unwrap().unwrap();
        assert_eq!(blob.mime_type, "image/jpeg");
        assert_eq!(blob.data, vec![9; 8]);

        let mut large = text_event("5511999990000@s.whatsapp.net", "M2");
        large.message_type = MessageType::Document;
        large.media = Some(InboundMedia {
            mime_type: "application/pdf".into(),
            url: Some("https://provider/m2".into()),
            data: Some(vec![0; 64]),
            ..Default::default()
        });
        let msg = f.inbound.receive(large).await.unwrap().unwrap();
        let media_ref = msg.media.unwrap();
        assert!(!media_ref.stored);
        assert_eq!(media_ref.url.as_deref(), Some("https://provider/m2"));
        assert!(media::get_media(&f.db, &msg.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn webhook_for_unknown_channel_or_bad_json_is_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.inbound.handle_webhook("nope", None, b"{}").await,
            Err(ParleyError::NotFound { .. })
        ));
        assert!(matches!(
            f.inbound.handle_webhook("wa", None, b"not json").await,
            Err(ParleyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn mock_webhook_round_trip() {
        let f = fixture().await;
        let body = json!({
            "messages": [
                { "from": "AB12CD@lid", "id": "X1", "text": "hello" },
                { "from": "AB12CD@lid", "phone": "5511999990000", "id": "X2", "text": "again" }
            ]
        });
        let summary = f
            .inbound
            .handle_webhook("wa", None, body.to_string().as_bytes())
            .await
            .unwrap();
        assert_eq!(summary.received, 2);
        assert_eq!(
            parley_storage::queries::contacts::count_contacts(&f.db, "wa")
                .await
                .unwrap(),
            1
        );
    }
}
