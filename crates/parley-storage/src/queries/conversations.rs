// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation operations.
//!
//! Auto-opened conversations are unique per `(contact, channel)` while not
//! CLOSED (partial unique index). Unread counters are only changed with
//! in-place SQL arithmetic, never read-modify-write.

use parley_core::ParleyError;
use parley_core::types::{ConversationStatus, Priority};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, is_constraint_violation};
use crate::models::{Conversation, ConversationFilter, UpdateOutcome, enum_col};

pub(crate) const COLUMNS: &str = "id, contact_id, channel_id, status, priority, assigned_user_id,
                                  unread_count, last_message_at, created_at, updated_at";

pub(crate) fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        channel_id: row.get(2)?,
        status: enum_col(row, 3)?,
        priority: enum_col(row, 4)?,
        assigned_user_id: row.get(5)?,
        unread_count: row.get(6)?,
        last_message_at: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn select_conversation(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
        row_to_conversation,
    )
    .optional()
}

/// Insert a conversation.
///
/// `auto_opened` rows participate in the one-active-per-contact rule; returns
/// `false` if another active auto-opened conversation already exists.
pub async fn insert_conversation(
    db: &Database,
    conversation: &Conversation,
    auto_opened: bool,
) -> Result<bool, ParleyError> {
    let c = conversation.clone();
    db.connection()
        .call(move |conn| {
            let result = conn.execute(
                "INSERT INTO conversations (id, contact_id, channel_id, status, priority,
                        assigned_user_id, unread_count, last_message_at, auto_opened,
                        created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    c.id,
                    c.contact_id,
                    c.channel_id,
                    c.status.to_string(),
                    c.priority.to_string(),
                    c.assigned_user_id,
                    c.unread_count,
                    c.last_message_at,
                    auto_opened,
                    c.created_at,
                    c.updated_at,
                ],
            );
            match result {
                Ok(_) => Ok(true),
                Err(e) if is_constraint_violation(&e) => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a conversation by id.
pub async fn get_conversation(
    db: &Database,
    id: &str,
) -> Result<Option<Conversation>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_conversation(conn, &id))
        .await
        .map_err(crate::database::map_tr_err)
}

/// The newest non-closed conversation for a contact on a channel.
pub async fn find_active_conversation(
    db: &Database,
    contact_id: &str,
    channel_id: &str,
) -> Result<Option<Conversation>, ParleyError> {
    let contact_id = contact_id.to_string();
    let channel_id = channel_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM conversations
                     WHERE contact_id = ?1 AND channel_id = ?2 AND status <> 'CLOSED'
                     ORDER BY auto_opened DESC, created_at DESC
                     LIMIT 1"
                ),
                params![contact_id, channel_id],
                row_to_conversation,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Reset the unread counter.
pub async fn mark_read(db: &Database, id: &str) -> Result<Option<Conversation>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET unread_count = 0,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            select_conversation(conn, &id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Set or clear the assignee.
pub async fn assign(
    db: &Database,
    id: &str,
    user_id: Option<&str>,
) -> Result<Option<Conversation>, ParleyError> {
    update_and_fetch(
        db,
        id,
        "UPDATE conversations SET assigned_user_id = ?2,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?1",
        user_id.map(str::to_string),
    )
    .await
}

/// Set the priority.
pub async fn set_priority(
    db: &Database,
    id: &str,
    priority: Priority,
) -> Result<Option<Conversation>, ParleyError> {
    update_and_fetch(
        db,
        id,
        "UPDATE conversations SET priority = ?2,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?1",
        Some(priority.to_string()),
    )
    .await
}

/// Set the lifecycle status.
///
/// Reopening fails with `Conflict` when the contact already has another
/// active auto-opened conversation on the channel.
pub async fn set_status(
    db: &Database,
    id: &str,
    status: ConversationStatus,
) -> Result<UpdateOutcome<Conversation>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.execute(
                "UPDATE conversations SET status = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id, status.to_string()],
            );
            match result {
                Ok(0) => Ok(UpdateOutcome::NotFound),
                Ok(_) => Ok(select_conversation(conn, &id)?
                    .map_or(UpdateOutcome::NotFound, UpdateOutcome::Updated)),
                Err(e) if is_constraint_violation(&e) => Ok(UpdateOutcome::Conflict),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Bump `last_message_at` without touching the unread counter (outbound traffic).
pub async fn touch(db: &Database, id: &str, at: &str) -> Result<(), ParleyError> {
    let id = id.to_string();
    let at = at.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE conversations SET last_message_at = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id, at],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List conversations, most recently active first.
pub async fn list_conversations(
    db: &Database,
    filter: &ConversationFilter,
) -> Result<Vec<Conversation>, ParleyError> {
    let filter = filter.clone();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM conversations
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR assigned_user_id = ?2)
                   AND (?3 IS NULL OR channel_id = ?3)
                   AND (?4 IS NULL OR contact_id = ?4)
                 ORDER BY COALESCE(last_message_at, created_at) DESC, id ASC
                 LIMIT ?5 OFFSET ?6"
            ))?;
            let rows = stmt.query_map(
                params![
                    filter.status.map(|s| s.to_string()),
                    filter.assigned_user_id,
                    filter.channel_id,
                    filter.contact_id,
                    filter.limit,
                    filter.offset,
                ],
                row_to_conversation,
            )?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

async fn update_and_fetch(
    db: &Database,
    id: &str,
    sql: &'static str,
    value: Option<String>,
) -> Result<Option<Conversation>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(sql, params![id, value])?;
            if changed == 0 {
                return Ok(None);
            }
            select_conversation(conn, &id)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
