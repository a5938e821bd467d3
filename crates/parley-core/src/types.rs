// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across adapter traits, storage, and the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Provider-assigned message identifier, used to correlate delivery receipts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderMessageId(pub String);

impl ProviderMessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is reachable but refusing work (e.g. rejected credentials).
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Channel,
    Storage,
}

/// Current UTC time in the storage timestamp format.
pub fn timestamp_now() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

/// UTC time `after` from now in the storage timestamp format.
pub fn timestamp_after(after: std::time::Duration) -> String {
    let delta = chrono::Duration::from_std(after).unwrap_or(chrono::Duration::MAX);
    let at = chrono::Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC);
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Free-form custom field map attached to a contact.
pub type CustomFields = BTreeMap<String, serde_json::Value>;

// --- Enumerations ---

/// Supported messaging provider families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Unofficial multi-device bridge gateway.
    Bridge,
    /// Official cloud business API.
    Cloud,
}

/// Message lifecycle state.
///
/// Outbound messages walk `PENDING -> SENT -> DELIVERED -> READ` and may stop
/// early at `FAILED`. Inbound messages are stored as `RECEIVED` and never move.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Received,
}

impl MessageStatus {
    /// Position on the delivery ladder. `FAILED` and `RECEIVED` are off-ladder.
    pub fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed | Self::Received => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Read | Self::Failed | Self::Received)
    }

    /// Whether the message has left the system successfully.
    pub fn is_sent(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Read)
    }

    /// Monotonic transition guard.
    ///
    /// Forward jumps are allowed (a READ receipt may arrive before DELIVERED),
    /// backward moves and self-transitions are not. `FAILED` is reachable only
    /// from `PENDING` or `SENT`.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => matches!(self, Self::Pending | Self::Sent),
            Self::Received => false,
            _ => match (self.rank(), next.rank()) {
                (Some(cur), Some(nxt)) => nxt > cur,
                _ => false,
            },
        }
    }
}

/// Message content kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageType {
    /// Whether the message must carry a media reference.
    pub fn is_media(self) -> bool {
        !matches!(self, Self::Text)
    }

    /// Infer a media kind from a MIME type.
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence.split('/').next() {
            Some("image") => Self::Image,
            Some("video") => Self::Video,
            Some("audio") => Self::Audio,
            _ => Self::Document,
        }
    }
}

/// Which side produced a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Who authored a message, derived from direction and user reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SenderKind {
    /// The external contact.
    Contact,
    /// An internal user (`user_id`) or an automated sender (`None`, e.g. campaigns).
    User { user_id: Option<String> },
}

/// Conversation lifecycle state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationStatus {
    Open,
    Pending,
    Closed,
}

/// Conversation triage priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Campaign lifecycle state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
}

// --- Entities ---

/// A canonical end-user identity on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub channel_id: String,
    /// Normalized phone number or provider-local LID (`<id>@lid`).
    pub channel_identifier: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
    #[serde(default)]
    pub custom_fields: CustomFields,
    pub created_at: String,
    pub updated_at: String,
}

impl Contact {
    /// Whether the identifier is an ephemeral provider-local id.
    pub fn is_lid(&self) -> bool {
        self.channel_identifier.ends_with("@lid")
    }
}

/// A thread between one contact and one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    pub channel_id: String,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub assigned_user_id: Option<String>,
    pub unread_count: i64,
    pub last_message_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Reference to a media object attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    /// Provider-absolute or caller-supplied URL, if known.
    pub url: Option<String>,
    pub mime_type: String,
    pub file_name: Option<String>,
    pub duration_secs: Option<u32>,
    pub file_length: Option<u64>,
    /// Bytes are held in the media store under the message id.
    #[serde(default)]
    pub stored: bool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub channel_id: String,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Text body or media caption.
    pub content: Option<String>,
    pub status: MessageStatus,
    pub sender_user_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub media: Option<MediaRef>,
    pub campaign_id: Option<String>,
    pub error: Option<String>,
    /// Attempts beyond the first.
    pub retry_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Message {
    /// Who authored this message.
    pub fn sender_kind(&self) -> SenderKind {
        match self.direction {
            Direction::Inbound => SenderKind::Contact,
            Direction::Outbound => SenderKind::User {
                user_id: self.sender_user_id.clone(),
            },
        }
    }
}

/// A bulk send definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub channel_id: String,
    pub template: String,
    pub status: CampaignStatus,
    pub scheduled_for: Option<String>,
    pub created_by: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Aggregate counters derived from recipient rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignCounts {
    pub total_recipients: i64,
    pub pending_count: i64,
    /// Recipients whose message left the system (SENT, DELIVERED, or READ).
    pub sent_count: i64,
    /// Recipients at DELIVERED or READ.
    pub delivered_count: i64,
    pub read_count: i64,
    pub failed_count: i64,
}

/// One contact's send attempt inside a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRecipient {
    pub id: String,
    pub campaign_id: String,
    pub contact_id: String,
    pub message_id: Option<String>,
    pub status: MessageStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    pub id: String,
    pub name: String,
    pub url: String,
    pub events: Vec<crate::events::EventType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub channel_id: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl WebhookSubscription {
    /// Whether this subscription wants the given event.
    pub fn matches(&self, event_type: crate::events::EventType, channel_id: Option<&str>) -> bool {
        if !self.active || !self.events.contains(&event_type) {
            return false;
        }
        match (&self.channel_id, channel_id) {
            (None, _) => true,
            (Some(filter), Some(channel)) => filter == channel,
            (Some(_), None) => false,
        }
    }
}

/// Final outcome of one event delivery to one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookExecution {
    pub id: String,
    pub subscription_id: String,
    pub event_id: String,
    pub event_type: String,
    pub success: bool,
    pub attempts: i64,
    pub response_status: Option<i64>,
    pub error: Option<String>,
    pub created_at: String,
}

/// A claimed outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub message_id: String,
    pub status: String,
    pub attempts: i64,
    pub next_attempt_at: String,
    pub locked_until: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// --- Channel types ---

/// How a provider wants audio delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioTransport {
    /// A fetchable URL.
    Url,
    /// Inline base64 bytes.
    Base64,
}

/// Capabilities reported by a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCapabilities {
    pub supports_images: bool,
    pub supports_video: bool,
    pub supports_audio: bool,
    pub supports_documents: bool,
    pub audio_transport: AudioTransport,
    /// Audio MIME essences accepted without re-encoding. Empty means any.
    pub accepted_audio: Vec<&'static str>,
    pub max_text_length: Option<usize>,
}

/// Routing context handed to an adapter for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendContext {
    pub channel_id: String,
    pub conversation_id: String,
    pub message_id: String,
    /// The contact's channel identifier (phone or LID).
    pub recipient: String,
}

/// Where media bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url(String),
    Bytes(Vec<u8>),
}

/// Canonical outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Media {
        kind: MessageType,
        source: MediaSource,
        mime_type: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
}

/// Successful provider send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSendResult {
    pub provider_message_id: ProviderMessageId,
    /// Optimistic initial status, normally `SENT`.
    pub status: MessageStatus,
}

/// Media carried by an inbound provider event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMedia {
    pub mime_type: String,
    pub url: Option<String>,
    pub data: Option<Vec<u8>>,
    pub file_name: Option<String>,
    pub duration_secs: Option<u32>,
    pub file_length: Option<u64>,
}

/// A message from a contact, normalized from a provider payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub channel_id: String,
    pub raw_identifier: String,
    pub observed_phone: Option<String>,
    /// Another identifier the provider reported for the same sender (a LID next to a phone JID).
    pub alt_identifier: Option<String>,
    pub display_name: Option<String>,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub media: Option<InboundMedia>,
    pub provider_message_id: String,
    pub timestamp: String,
}

/// An asynchronous status report for a previously sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub channel_id: String,
    pub provider_message_id: String,
    pub status: MessageStatus,
    pub error: Option<String>,
    pub timestamp: String,
}

/// Result of normalizing one provider payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    Message(InboundEvent),
    Receipt(DeliveryReceipt),
    Ignored { reason: String },
}
