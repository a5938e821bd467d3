// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain events (webhook fanout) and live updates (UI push).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::types::{MessageStatus, timestamp_now};

/// The fixed set of events a webhook subscription may select.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum EventType {
    #[strum(serialize = "message.received")]
    #[serde(rename = "message.received")]
    MessageReceived,
    #[strum(serialize = "message.sent")]
    #[serde(rename = "message.sent")]
    MessageSent,
    #[strum(serialize = "conversation.created")]
    #[serde(rename = "conversation.created")]
    ConversationCreated,
    #[strum(serialize = "conversation.updated")]
    #[serde(rename = "conversation.updated")]
    ConversationUpdated,
    #[strum(serialize = "conversation.assigned")]
    #[serde(rename = "conversation.assigned")]
    ConversationAssigned,
    #[strum(serialize = "contact.created")]
    #[serde(rename = "contact.created")]
    ContactCreated,
    #[strum(serialize = "contact.updated")]
    #[serde(rename = "contact.updated")]
    ContactUpdated,
}

/// A domain event as delivered to webhook subscribers.
///
/// `id` is stable across redeliveries so subscribers can de-duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    pub id: String,
    pub event: EventType,
    pub occurred_at: String,
    pub channel_id: Option<String>,
    pub data: serde_json::Value,
}

impl DomainEvent {
    /// Create an event with a fresh id and the current timestamp.
    pub fn new(event: EventType, channel_id: Option<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event,
            occurred_at: timestamp_now(),
            channel_id,
            data,
        }
    }

    /// Serialize `data` from any serializable entity.
    pub fn from_entity<T: Serialize>(
        event: EventType,
        channel_id: &str,
        entity: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            event,
            Some(channel_id.to_string()),
            serde_json::to_value(entity)?,
        ))
    }
}

/// Push notification for connected UI sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveUpdate {
    /// A message was appended to a conversation.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        conversation_id: String,
        channel_id: String,
        message_id: String,
    },
    /// Conversation attributes changed (unread, status, assignment, activity).
    #[serde(rename_all = "camelCase")]
    ConversationUpdated {
        conversation_id: String,
        channel_id: String,
    },
    /// An outbound message advanced on the delivery ladder.
    #[serde(rename_all = "camelCase")]
    MessageStatus {
        conversation_id: String,
        channel_id: String,
        message_id: String,
        status: MessageStatus,
    },
}

impl LiveUpdate {
    /// The conversation this update concerns.
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::NewMessage { conversation_id, .. }
            | Self::ConversationUpdated { conversation_id, .. }
            | Self::MessageStatus { conversation_id, .. } => conversation_id,
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            Self::NewMessage { channel_id, .. }
            | Self::ConversationUpdated { channel_id, .. }
            | Self::MessageStatus { channel_id, .. } => channel_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn event_type_has_seven_variants() {
        let all: Vec<EventType> = EventType::iter().collect();
        assert_eq!(all.len(), 7);
        for variant in all {
            let s = variant.to_string();
            assert_eq!(EventType::from_str(&s).unwrap(), variant);
            let json = serde_json::to_string(&variant).unwrap();
            assert_eq!(json, format!("\"{s}\""));
        }
    }

    #[test]
    fn unknown_event_rejected() {
        assert!(EventType::from_str("deal.won").is_err());
    }

    #[test]
    fn live_update_wire_shape() {
        let update = LiveUpdate::NewMessage {
            conversation_id: "c1".into(),
            channel_id: "wa".into(),
            message_id: "m1".into(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["channelId"], "wa");
        assert_eq!(update.conversation_id(), "c1");
    }

    #[test]
    fn domain_events_get_unique_ids() {
        let a = DomainEvent::new(EventType::ContactCreated, None, serde_json::json!({}));
        let b = DomainEvent::new(EventType::ContactCreated, None, serde_json::json!({}));
        assert_ne!(a.id, b.id);
    }
}
