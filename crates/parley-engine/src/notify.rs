// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event emission shared by the engine components.

use std::sync::Arc;

use parley_bus::EventBus;
use parley_core::types::{Conversation, Message};
use parley_core::{DomainEvent, EventType, LiveUpdate};
use serde::Serialize;
use tracing::warn;

/// Thin wrapper that turns entities into bus events.
#[derive(Clone)]
pub struct Notifier {
    bus: Arc<EventBus>,
}

impl Notifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish a domain event for webhook fanout. Serialization failures are logged.
    pub async fn domain<T: Serialize>(&self, event: EventType, channel_id: &str, entity: &T) {
        match DomainEvent::from_entity(event, channel_id, entity) {
            Ok(event) => self.bus.publish(event).await,
            Err(e) => warn!(event = %event, error = %e, "failed to serialize domain event"),
        }
    }

    pub fn new_message(&self, message: &Message) {
        self.bus.publish_live(LiveUpdate::NewMessage {
            conversation_id: message.conversation_id.clone(),
            channel_id: message.channel_id.clone(),
            message_id: message.id.clone(),
        });
    }

    pub fn message_status(&self, message: &Message) {
        self.bus.publish_live(LiveUpdate::MessageStatus {
            conversation_id: message.conversation_id.clone(),
            channel_id: message.channel_id.clone(),
            message_id: message.id.clone(),
            status: message.status,
        });
    }

    pub fn conversation_updated(&self, conversation: &Conversation) {
        self.bus.publish_live(LiveUpdate::ConversationUpdated {
            conversation_id: conversation.id.clone(),
            channel_id: conversation.channel_id.clone(),
        });
    }
}
