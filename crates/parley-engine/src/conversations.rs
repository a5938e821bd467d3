// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation lifecycle.
//!
//! At most one active conversation per (contact, channel) is opened
//! automatically; the storage layer enforces it with a partial unique index
//! and `open_or_get` re-fetches on conflict. Closed conversations are never
//! reopened by inbound traffic; a new one is started instead. Conversations
//! made with `create` sit outside that rule, so an agent can hold several
//! threads with one contact.

use parley_core::types::{
    Contact, Conversation, ConversationStatus, Message, Priority, timestamp_now,
};
use parley_core::{EventType, ParleyError};
use parley_storage::queries::{conversations, messages};
use parley_storage::{ConversationFilter, Database, UpdateOutcome};
use tracing::{debug, info};

use crate::identity::IdentityResolver;
use crate::notify::Notifier;

const MAX_ROUNDS: usize = 4;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Clone)]
pub struct ConversationManager {
    db: Database,
    notifier: Notifier,
    identity: IdentityResolver,
}

impl ConversationManager {
    pub fn new(db: Database, notifier: Notifier, identity: IdentityResolver) -> Self {
        Self {
            db,
            notifier,
            identity,
        }
    }

    /// Return the active conversation for a contact, opening one if none exists.
    pub async fn open_or_get(&self, contact: &Contact) -> Result<Conversation, ParleyError> {
        for round in 0..MAX_ROUNDS {
            if let Some(existing) =
                conversations::find_active_conversation(&self.db, &contact.id, &contact.channel_id)
                    .await?
            {
                return Ok(existing);
            }

            let conversation = new_conversation(contact);
            if conversations::insert_conversation(&self.db, &conversation, true).await? {
                info!(
                    conversation_id = %conversation.id,
                    contact_id = %contact.id,
                    channel_id = %contact.channel_id,
                    "conversation opened"
                );
                self.announce(&conversation).await;
                return Ok(conversation);
            }
            debug!(contact_id = %contact.id, round, "conversation opened concurrently, re-fetching");
        }
        Err(ParleyError::Internal(format!(
            "could not open a conversation for contact {}",
            contact.id
        )))
    }

    /// Start a new conversation even when the contact already has an active one.
    pub async fn create(&self, contact: &Contact) -> Result<Conversation, ParleyError> {
        let conversation = new_conversation(contact);
        if !conversations::insert_conversation(&self.db, &conversation, false).await? {
            return Err(ParleyError::Internal(format!(
                "could not create a conversation for contact {}",
                contact.id
            )));
        }
        info!(
            conversation_id = %conversation.id,
            contact_id = %contact.id,
            channel_id = %contact.channel_id,
            "conversation created"
        );
        self.announce(&conversation).await;
        Ok(conversation)
    }

    /// Resolve a contact from a phone number and start a new conversation.
    pub async fn create_from_phone(
        &self,
        channel_id: &str,
        phone: &str,
    ) -> Result<Conversation, ParleyError> {
        let contact = self.identity.resolve_phone(channel_id, phone).await?;
        self.create(&contact).await
    }

    async fn announce(&self, conversation: &Conversation) {
        self.notifier
            .domain(
                EventType::ConversationCreated,
                &conversation.channel_id,
                conversation,
            )
            .await;
        self.notifier.conversation_updated(conversation);
    }

    /// Resolve a contact from a phone number and open (or reuse) its conversation.
    pub async fn start_from_phone(
        &self,
        channel_id: &str,
        phone: &str,
    ) -> Result<Conversation, ParleyError> {
        let contact = self.identity.resolve_phone(channel_id, phone).await?;
        self.open_or_get(&contact).await
    }

    pub async fn get(&self, id: &str) -> Result<Conversation, ParleyError> {
        conversations::get_conversation(&self.db, id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", id))
    }

    /// List conversations. Limits are clamped to `1..=MAX_PAGE_SIZE`.
    pub async fn list(&self, mut filter: ConversationFilter) -> Result<Vec<Conversation>, ParleyError> {
        filter.limit = clamp_limit(filter.limit);
        filter.offset = filter.offset.max(0);
        conversations::list_conversations(&self.db, &filter).await
    }

    /// Messages of a conversation in creation order.
    pub async fn messages(
        &self,
        conversation_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, ParleyError> {
        self.get(conversation_id).await?;
        messages::list_messages(&self.db, conversation_id, clamp_limit(limit), offset.max(0)).await
    }

    pub async fn mark_read(&self, id: &str) -> Result<Conversation, ParleyError> {
        let conversation = conversations::mark_read(&self.db, id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", id))?;
        self.notifier.conversation_updated(&conversation);
        Ok(conversation)
    }

    /// Set or clear the assignee.
    pub async fn assign(
        &self,
        id: &str,
        user_id: Option<&str>,
    ) -> Result<Conversation, ParleyError> {
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty());
        let conversation = conversations::assign(&self.db, id, user_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", id))?;
        info!(
            conversation_id = %id,
            assigned_user_id = ?conversation.assigned_user_id,
            "conversation assigned"
        );
        self.notifier
            .domain(
                EventType::ConversationAssigned,
                &conversation.channel_id,
                &conversation,
            )
            .await;
        self.notifier.conversation_updated(&conversation);
        Ok(conversation)
    }

    /// Change the lifecycle status.
    ///
    /// Reopening fails with `InvalidState` when the contact already has
    /// another active conversation on the channel.
    pub async fn set_status(
        &self,
        id: &str,
        status: ConversationStatus,
    ) -> Result<Conversation, ParleyError> {
        let current = self.get(id).await?;
        if current.status == status {
            return Ok(current);
        }
        let conversation = match conversations::set_status(&self.db, id, status).await? {
            UpdateOutcome::Updated(c) => c,
            UpdateOutcome::NotFound => return Err(ParleyError::not_found("conversation", id)),
            UpdateOutcome::Conflict => {
                return Err(ParleyError::InvalidState {
                    entity: "conversation",
                    id: id.to_string(),
                    state: current.status.to_string(),
                    operation: "reopen",
                });
            }
        };
        info!(conversation_id = %id, from = %current.status, to = %status, "conversation status changed");
        self.conversation_changed(&conversation).await;
        Ok(conversation)
    }

    pub async fn set_priority(&self, id: &str, priority: Priority) -> Result<Conversation, ParleyError> {
        let conversation = conversations::set_priority(&self.db, id, priority)
            .await?
            .ok_or_else(|| ParleyError::not_found("conversation", id))?;
        self.conversation_changed(&conversation).await;
        Ok(conversation)
    }

    /// Emit `conversation.updated` plus a live update.
    pub(crate) async fn conversation_changed(&self, conversation: &Conversation) {
        self.notifier
            .domain(
                EventType::ConversationUpdated,
                &conversation.channel_id,
                conversation,
            )
            .await;
        self.notifier.conversation_updated(conversation);
    }
}

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        50
    } else {
        limit.min(MAX_PAGE_SIZE)
    }
}

fn new_conversation(contact: &Contact) -> Conversation {
    let now = timestamp_now();
    Conversation {
        id: uuid::Uuid::new_v4().to_string(),
        contact_id: contact.id.clone(),
        channel_id: contact.channel_id.clone(),
        status: ConversationStatus::Open,
        priority: Priority::Normal,
        assigned_user_id: None,
        unread_count: 0,
        last_message_at: None,
        created_at: now.clone(),
        updated_at: now,
    }
}
