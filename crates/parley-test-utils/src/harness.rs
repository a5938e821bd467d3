// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete engine over a temp SQLite database,
//! the event bus, a campaign executor, and one [`MockChannel`] registered as
//! channel `wa`. Retries use a zero-delay backoff so failure paths settle
//! immediately.

use std::sync::Arc;
use std::time::Duration;

use parley_bus::EventBus;
use parley_campaign::CampaignExecutor;
use parley_config::model::ParleyConfig;
use parley_core::ParleyError;
use parley_core::types::{Contact, Conversation, Message, MessageStatus};
use parley_engine::{AdapterRegistry, Engine, EngineOptions, InboundSummary, PipelineOptions, SendRequest};
use parley_resilience::BackoffPolicy;
use parley_storage::Database;
use serde_json::json;

use crate::mock_channel::MockChannel;

/// Channel id the harness registers its mock under.
pub const MOCK_CHANNEL_ID: &str = "wa";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    channel: Option<MockChannel>,
    max_attempts: u32,
    workers: usize,
    max_inline_bytes: usize,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            channel: None,
            max_attempts: 3,
            workers: 2,
            max_inline_bytes: 1024 * 1024,
        }
    }

    /// Use a pre-configured mock channel. Its id should be [`MOCK_CHANNEL_ID`].
    pub fn with_channel(mut self, channel: MockChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Total send attempts per message before it fails.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Campaign worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_inline_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_bytes = bytes;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, ParleyError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| ParleyError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let db = Database::open(&db_path).await?;

        let mut config = ParleyConfig::default();
        config.storage.database_path = db_path;
        config.pipeline.max_attempts = self.max_attempts;
        config.campaign.default_workers = self.workers;
        config.media.max_inline_bytes = self.max_inline_bytes;

        let mock_channel = Arc::new(
            self.channel
                .unwrap_or_else(|| MockChannel::new(MOCK_CHANNEL_ID)),
        );
        let mut registry = AdapterRegistry::new();
        registry.register(mock_channel.clone())?;

        let options = EngineOptions {
            pipeline: PipelineOptions {
                policy: BackoffPolicy::immediate(self.max_attempts),
                send_timeout: Duration::from_secs(5),
                lock_timeout: Duration::from_secs(60),
                max_inline_bytes: self.max_inline_bytes,
            },
            outbox_poll: Duration::from_millis(10),
        };
        let bus = Arc::new(EventBus::default());
        let engine = Engine::new(db, bus.clone(), registry, options);
        let campaigns = CampaignExecutor::new(engine.clone(), config.campaign.clone());

        Ok(TestHarness {
            mock_channel,
            engine,
            campaigns,
            bus,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with a mock channel and temp storage.
pub struct TestHarness {
    /// The mock channel adapter, registered as [`MOCK_CHANNEL_ID`].
    pub mock_channel: Arc<MockChannel>,
    /// Engine wired over the temp database.
    pub engine: Engine,
    /// Campaign executor sharing the engine.
    pub campaigns: CampaignExecutor,
    /// Event bus the engine publishes to.
    pub bus: Arc<EventBus>,
    /// Configuration matching the harness settings.
    pub config: ParleyConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub fn database(&self) -> &Database {
        self.engine.database()
    }

    /// Feed a raw mock-channel webhook body through inbound processing.
    pub async fn inbound(&self, body: serde_json::Value) -> Result<InboundSummary, ParleyError> {
        let bytes = serde_json::to_vec(&body)?;
        self.engine
            .inbound
            .handle_webhook(MOCK_CHANNEL_ID, None, &bytes)
            .await
    }

    /// Deliver one inbound text from `from`.
    pub async fn receive_text(
        &self,
        from: &str,
        provider_message_id: &str,
        text: &str,
    ) -> Result<InboundSummary, ParleyError> {
        self.inbound(json!({
            "messages": [{ "from": from, "id": provider_message_id, "text": text }]
        }))
        .await
    }

    /// Deliver a status receipt for a provider message id.
    pub async fn receipt(
        &self,
        provider_message_id: &str,
        status: MessageStatus,
    ) -> Result<InboundSummary, ParleyError> {
        self.inbound(json!({
            "receipts": [{ "id": provider_message_id, "status": status.to_string() }]
        }))
        .await
    }

    /// Resolve a contact by phone on the mock channel.
    pub async fn contact(&self, phone: &str) -> Result<Contact, ParleyError> {
        self.engine.identity.resolve_phone(MOCK_CHANNEL_ID, phone).await
    }

    /// Open (or reuse) a conversation with `phone`.
    pub async fn conversation(&self, phone: &str) -> Result<Conversation, ParleyError> {
        self.engine
            .conversations
            .start_from_phone(MOCK_CHANNEL_ID, phone)
            .await
    }

    /// Submit a text and drive it until it settles.
    pub async fn send_text(&self, conversation_id: &str, text: &str) -> Result<Message, ParleyError> {
        let accepted = self
            .engine
            .pipeline
            .submit(
                SendRequest {
                    conversation_id: conversation_id.to_string(),
                    content: Some(text.to_string()),
                    ..SendRequest::default()
                },
                Some("agent-1"),
            )
            .await?;
        self.engine.pipeline.drive(&accepted.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_creates_working_environment() {
        let harness = TestHarness::builder().build().await.unwrap();
        assert_eq!(harness.engine.channels().len(), 1);
        assert_eq!(harness.engine.channels()[0].channel_id, MOCK_CHANNEL_ID);
    }

    #[tokio::test]
    async fn send_text_reaches_mock_channel() {
        let harness = TestHarness::builder().build().await.unwrap();
        let conv = harness.conversation("5511999990000").await.unwrap();
        let sent = harness.send_text(&conv.id, "hello").await.unwrap();

        assert_eq!(sent.status, MessageStatus::Sent);
        assert_eq!(harness.mock_channel.call_count(), 1);
        assert_eq!(
            harness.mock_channel.recipients(),
            vec!["5511999990000@s.whatsapp.net"]
        );
    }

    #[tokio::test]
    async fn receive_text_creates_conversation() {
        let harness = TestHarness::builder().build().await.unwrap();
        let summary = harness
            .receive_text("5511999990000@s.whatsapp.net", "P1", "oi")
            .await
            .unwrap();
        assert_eq!(summary.received, 1);

        let conv = harness.conversation("5511999990000").await.unwrap();
        assert_eq!(conv.unread_count, 1);
    }

    #[tokio::test]
    async fn temp_db_is_unique_per_harness() {
        let h1 = TestHarness::builder().build().await.unwrap();
        let h2 = TestHarness::builder().build().await.unwrap();

        h1.receive_text("5511999990000@s.whatsapp.net", "P1", "oi")
            .await
            .unwrap();
        let c1 = parley_storage::queries::contacts::count_contacts(h1.database(), MOCK_CHANNEL_ID)
            .await
            .unwrap();
        let c2 = parley_storage::queries::contacts::count_contacts(h2.database(), MOCK_CHANNEL_ID)
            .await
            .unwrap();
        assert_eq!(c1, 1);
        assert_eq!(c2, 0);
    }
}
