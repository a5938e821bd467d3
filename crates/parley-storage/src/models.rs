// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! The canonical types are defined in `parley-core::types` for use across
//! crate boundaries. This module re-exports them and holds the column
//! conversion helpers shared by the query modules.

use std::str::FromStr;

use rusqlite::Row;
use rusqlite::types::Type;

pub use parley_core::types::{
    Campaign, CampaignCounts, CampaignRecipient, Contact, Conversation, MediaRef, Message,
    OutboxEntry, WebhookExecution, WebhookSubscription,
};

/// A stored media blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub message_id: String,
    pub mime_type: String,
    pub file_name: Option<String>,
    pub data: Vec<u8>,
}

/// Parse a TEXT column holding a strum-serialized enum.
pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a TEXT column holding JSON.
pub(crate) fn json_col<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a nullable TEXT column holding JSON.
pub(crate) fn json_col_opt<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Serialize a value into a JSON TEXT column.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Result of a guarded update that may hit a uniqueness rule.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    Updated(T),
    NotFound,
    Conflict,
}

/// Filter for listing conversations. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub status: Option<parley_core::types::ConversationStatus>,
    pub assigned_user_id: Option<String>,
    pub channel_id: Option<String>,
    pub contact_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// An outbound message plus everything persisted atomically with it.
#[derive(Debug, Clone)]
pub struct NewOutbound {
    pub message: Message,
    /// Campaign recipient row to link to the message.
    pub recipient_id: Option<String>,
    /// Uploaded media bytes to keep alongside the message.
    pub blob: Option<MediaBlob>,
    /// Insert the outbox row already claimed until this timestamp.
    pub claimed_until: Option<String>,
}

/// Outcome of correlating a delivery receipt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptOutcome {
    /// The receipt advanced the message.
    Applied {
        message: Message,
        previous: parley_core::types::MessageStatus,
    },
    /// The message already reached or passed the reported state.
    Ignored(Message),
    /// No message carries that provider id.
    Unknown,
}
