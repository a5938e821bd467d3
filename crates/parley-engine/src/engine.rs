// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires the engine components over one database, bus, and adapter set.

use std::sync::Arc;
use std::time::Duration;

use parley_bus::EventBus;
use parley_config::model::ParleyConfig;
use parley_core::{ParleyError, PluginAdapter};
use parley_core::types::HealthStatus;
use parley_resilience::{ChannelHealth, ChannelHealthRegistry};
use parley_storage::Database;
use serde::Serialize;

use crate::conversations::ConversationManager;
use crate::identity::IdentityResolver;
use crate::inbound::InboundProcessor;
use crate::notify::Notifier;
use crate::outbox::OutboxWorker;
use crate::pipeline::{MessagePipeline, PipelineOptions};
use crate::registry::AdapterRegistry;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub pipeline: PipelineOptions,
    pub outbox_poll: Duration,
}

impl EngineOptions {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            pipeline: PipelineOptions::from_config(config),
            outbox_poll: Duration::from_millis(config.pipeline.outbox_poll_ms),
        }
    }
}

/// One configured channel as reported by `GET /v1/channels`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub channel_id: String,
    pub name: String,
    pub kind: parley_core::types::ChannelKind,
    pub health: ChannelHealth,
}

#[derive(Clone)]
pub struct Engine {
    pub identity: IdentityResolver,
    pub conversations: ConversationManager,
    pub pipeline: MessagePipeline,
    pub inbound: InboundProcessor,
    db: Database,
    bus: Arc<EventBus>,
    registry: Arc<AdapterRegistry>,
    health: Arc<ChannelHealthRegistry>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        db: Database,
        bus: Arc<EventBus>,
        registry: AdapterRegistry,
        options: EngineOptions,
    ) -> Self {
        let notifier = Notifier::new(bus.clone());
        let registry = Arc::new(registry);
        let health = Arc::new(ChannelHealthRegistry::new());

        let identity = IdentityResolver::new(db.clone(), notifier.clone());
        let conversations =
            ConversationManager::new(db.clone(), notifier.clone(), identity.clone());
        let pipeline = MessagePipeline::new(
            db.clone(),
            notifier.clone(),
            registry.clone(),
            health.clone(),
            options.pipeline.clone(),
        );
        let inbound = InboundProcessor::new(
            db.clone(),
            notifier,
            registry.clone(),
            identity.clone(),
            conversations.clone(),
            pipeline.clone(),
            options.pipeline.max_inline_bytes,
        );

        Self {
            identity,
            conversations,
            pipeline,
            inbound,
            db,
            bus,
            registry,
            health,
            options,
        }
    }

    /// Build the engine and its adapters from configuration.
    pub fn from_config(
        db: Database,
        bus: Arc<EventBus>,
        config: &ParleyConfig,
    ) -> Result<Self, ParleyError> {
        let registry = AdapterRegistry::from_config(config)?;
        Ok(Self::new(db, bus, registry, EngineOptions::from_config(config)))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry> {
        &self.registry
    }

    pub fn channel_health(&self) -> &Arc<ChannelHealthRegistry> {
        &self.health
    }

    /// A worker draining the outbox for this engine's pipeline.
    pub fn outbox_worker(&self) -> OutboxWorker {
        OutboxWorker::new(
            self.pipeline.clone(),
            self.options.outbox_poll,
            self.options.pipeline.lock_timeout,
        )
    }

    /// Every configured channel with its degradation state.
    pub fn channels(&self) -> Vec<ChannelStatus> {
        self.registry
            .channel_ids()
            .filter_map(|id| self.registry.get(id))
            .map(|adapter| ChannelStatus {
                channel_id: adapter.channel_id().to_string(),
                name: adapter.name().to_string(),
                kind: adapter.kind(),
                health: self.health.health(adapter.channel_id()),
            })
            .collect()
    }

    /// Clear a channel's degradation. Returns whether it was degraded.
    pub fn reset_channel(&self, channel_id: &str) -> Result<bool, ParleyError> {
        if !self.registry.contains(channel_id) {
            return Err(ParleyError::not_found("channel", channel_id));
        }
        Ok(self.health.reset(channel_id))
    }

    /// Provider health checks, overridden by local degradation.
    pub async fn provider_health(&self) -> Vec<(String, HealthStatus)> {
        self.registry
            .health()
            .await
            .into_iter()
            .map(|(id, status)| match self.health.degraded_reason(&id) {
                Some(reason) => (id, HealthStatus::Degraded(reason)),
                None => (id, status),
            })
            .collect()
    }

    /// Shut every adapter down.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use parley_core::ChannelError;
    use parley_resilience::BackoffPolicy;
    use parley_test_utils::MockChannel;

    use super::*;

    fn options() -> EngineOptions {
        EngineOptions {
            pipeline: PipelineOptions {
                policy: BackoffPolicy::immediate(1),
                send_timeout: Duration::from_secs(5),
                lock_timeout: Duration::from_secs(60),
                max_inline_bytes: 1024,
            },
            outbox_poll: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn channels_report_and_reset_degradation() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let channel = Arc::new(MockChannel::new("wa"));
        let mut registry = AdapterRegistry::new();
        registry.register(channel.clone()).unwrap();
        let engine = Engine::new(db, Arc::new(EventBus::default()), registry, options());

        assert_eq!(engine.channels()[0].health, ChannelHealth::Healthy);

        channel.push_err(ChannelError::Auth("expired".into()));
        let conv = engine
            .conversations
            .start_from_phone("wa", "5511999990000")
            .await
            .unwrap();
        let msg = engine
            .pipeline
            .submit(
                crate::pipeline::SendRequest {
                    conversation_id: conv.id,
                    content: Some("hi".into()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        engine.pipeline.drive(&msg.id).await.unwrap();

        assert!(matches!(
            engine.channels()[0].health,
            ChannelHealth::Degraded { .. }
        ));
        let health = engine.provider_health().await;
        assert!(matches!(health[0].1, HealthStatus::Degraded(_)));

        assert!(engine.reset_channel("wa").unwrap());
        assert!(!engine.reset_channel("wa").unwrap());
        assert!(matches!(
            engine.reset_channel("nope"),
            Err(ParleyError::NotFound { .. })
        ));
    }
}
