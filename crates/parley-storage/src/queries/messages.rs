// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message operations and status transitions.
//!
//! Every status write is guarded in SQL by the state it is allowed to leave,
//! and mirrored onto the linked campaign recipient row in the same transaction.

use parley_core::ParleyError;
use parley_core::types::MessageStatus;
use rusqlite::{OptionalExtension, Row, Transaction, params};

use crate::database::{Database, is_unique_violation};
use crate::models::{
    Conversation, Message, NewOutbound, ReceiptOutcome, enum_col, json_col_opt, to_json,
};

const COLUMNS: &str = "id, conversation_id, channel_id, direction, message_type, content, status,
                       sender_user_id, provider_message_id, media, campaign_id, error,
                       retry_count, created_at, updated_at";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        channel_id: row.get(2)?,
        direction: enum_col(row, 3)?,
        message_type: enum_col(row, 4)?,
        content: row.get(5)?,
        status: enum_col(row, 6)?,
        sender_user_id: row.get(7)?,
        provider_message_id: row.get(8)?,
        media: json_col_opt(row, 9)?,
        campaign_id: row.get(10)?,
        error: row.get(11)?,
        retry_count: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn select_message(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
        params![id],
        row_to_message,
    )
    .optional()
}

fn insert_row(tx: &Transaction<'_>, msg: &Message) -> rusqlite::Result<usize> {
    let media = msg.media.as_ref().map(to_json).transpose()?;
    tx.execute(
        "INSERT INTO messages (id, conversation_id, channel_id, direction, message_type, content,
                status, sender_user_id, provider_message_id, media, campaign_id, error,
                retry_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            msg.id,
            msg.conversation_id,
            msg.channel_id,
            msg.direction.to_string(),
            msg.message_type.to_string(),
            msg.content,
            msg.status.to_string(),
            msg.sender_user_id,
            msg.provider_message_id,
            media,
            msg.campaign_id,
            msg.error,
            msg.retry_count,
            msg.created_at,
            msg.updated_at,
        ],
    )
}

fn sync_recipient(
    tx: &Transaction<'_>,
    message_id: &str,
    status: MessageStatus,
    error: Option<&str>,
) -> rusqlite::Result<()> {
    tx.execute(
        "UPDATE campaign_recipients SET status = ?2, error = COALESCE(?3, error),
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE message_id = ?1",
        params![message_id, status.to_string(), error],
    )?;
    Ok(())
}

/// Persist an outbound PENDING message together with its outbox job.
///
/// Also links the campaign recipient, stores uploaded media, and bumps the
/// conversation's `last_message_at`, all in one transaction.
pub async fn insert_outbound(db: &Database, new: NewOutbound) -> Result<(), ParleyError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let msg = &new.message;
            insert_row(&tx, msg)?;
            match &new.claimed_until {
                Some(until) => tx.execute(
                    "INSERT INTO outbox (message_id, status, locked_until) VALUES (?1, 'processing', ?2)",
                    params![msg.id, until],
                )?,
                None => tx.execute(
                    "INSERT INTO outbox (message_id) VALUES (?1)",
                    params![msg.id],
                )?,
            };
            if let Some(recipient_id) = &new.recipient_id {
                tx.execute(
                    "UPDATE campaign_recipients SET message_id = ?2, status = ?3,
                            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1",
                    params![recipient_id, msg.id, msg.status.to_string()],
                )?;
            }
            if let Some(blob) = &new.blob {
                crate::queries::media::insert_blob(&tx, blob)?;
            }
            tx.execute(
                "UPDATE conversations SET last_message_at = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![msg.conversation_id, msg.created_at],
            )?;
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Persist an inbound message and bump the conversation's unread counter.
///
/// Returns the updated conversation, or `None` if a message with the same
/// provider id was already stored on the channel (replayed webhook).
pub async fn insert_inbound(
    db: &Database,
    message: &Message,
    blob: Option<crate::models::MediaBlob>,
) -> Result<Option<Conversation>, ParleyError> {
    let msg = message.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            match insert_row(&tx, &msg) {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e, "messages.provider_message_id") => {
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
            if let Some(blob) = &blob {
                crate::queries::media::insert_blob(&tx, blob)?;
            }
            tx.execute(
                "UPDATE conversations SET unread_count = unread_count + 1,
                        last_message_at = MAX(COALESCE(last_message_at, ''), ?2),
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![msg.conversation_id, msg.created_at],
            )?;
            let conversation =
                crate::queries::conversations::select_conversation(&tx, &msg.conversation_id)?;
            tx.commit()?;
            Ok(conversation)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a message by id.
pub async fn get_message(db: &Database, id: &str) -> Result<Option<Message>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_message(conn, &id))
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a message by the id the provider assigned to it.
pub async fn get_message_by_provider_id(
    db: &Database,
    channel_id: &str,
    provider_message_id: &str,
) -> Result<Option<Message>, ParleyError> {
    let channel_id = channel_id.to_string();
    let provider_message_id = provider_message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM messages
                     WHERE channel_id = ?1 AND provider_message_id = ?2"
                ),
                params![channel_id, provider_message_id],
                row_to_message,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Messages of a conversation in creation order.
pub async fn list_messages(
    db: &Database,
    conversation_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Message>, ParleyError> {
    let conversation_id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(params![conversation_id, limit, offset], row_to_message)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// PENDING -> `status` (normally SENT) after the provider accepted the send.
///
/// Completes the outbox job. Returns `None` if the message had left PENDING.
pub async fn mark_sent(
    db: &Database,
    id: &str,
    provider_message_id: &str,
    status: MessageStatus,
) -> Result<Option<Message>, ParleyError> {
    let id = id.to_string();
    let provider_message_id = provider_message_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET status = ?2, provider_message_id = ?3, error = NULL,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'PENDING'",
                params![id, status.to_string(), provider_message_id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            tx.execute(
                "UPDATE outbox SET status = 'completed', attempts = attempts + 1,
                        locked_until = NULL,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE message_id = ?1",
                params![id],
            )?;
            sync_recipient(&tx, &id, status, None)?;
            let message = select_message(&tx, &id)?;
            tx.commit()?;
            Ok(message)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// PENDING/SENT -> FAILED with the surfaced error.
///
/// Returns `None` if the message was in a state that cannot fail.
pub async fn mark_failed(
    db: &Database,
    id: &str,
    error: &str,
) -> Result<Option<Message>, ParleyError> {
    let id = id.to_string();
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET status = 'FAILED', error = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status IN ('PENDING', 'SENT')",
                params![id, error],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            tx.execute(
                "UPDATE outbox SET status = 'failed', attempts = attempts + 1, last_error = ?2,
                        locked_until = NULL,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE message_id = ?1 AND status <> 'completed'",
                params![id, error],
            )?;
            sync_recipient(&tx, &id, MessageStatus::Failed, Some(&error))?;
            let message = select_message(&tx, &id)?;
            tx.commit()?;
            Ok(message)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record a retryable failure and schedule the next attempt.
///
/// With `hold_until` the outbox job stays claimed (an inline driver owns it);
/// otherwise it returns to the pending pool at `next_attempt_at`.
pub async fn record_retry(
    db: &Database,
    id: &str,
    error: &str,
    next_attempt_at: &str,
    hold_until: Option<&str>,
) -> Result<Option<Message>, ParleyError> {
    let id = id.to_string();
    let error = error.to_string();
    let next_attempt_at = next_attempt_at.to_string();
    let hold_until = hold_until.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE messages SET retry_count = retry_count + 1, error = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'PENDING'",
                params![id, error],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            tx.execute(
                "UPDATE outbox SET attempts = attempts + 1, last_error = ?2, next_attempt_at = ?3,
                        status = CASE WHEN ?4 IS NULL THEN 'pending' ELSE 'processing' END,
                        locked_until = ?4,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE message_id = ?1",
                params![id, error, next_attempt_at, hold_until],
            )?;
            let message = select_message(&tx, &id)?;
            tx.commit()?;
            Ok(message)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Apply a delivery receipt correlated by provider message id.
///
/// Only forward moves stick. A receipt for a state the message already
/// reached or passed is ignored, so replays and out-of-order arrival are safe.
pub async fn apply_receipt(
    db: &Database,
    channel_id: &str,
    provider_message_id: &str,
    status: MessageStatus,
    error: Option<&str>,
) -> Result<ReceiptOutcome, ParleyError> {
    let channel_id = channel_id.to_string();
    let provider_message_id = provider_message_id.to_string();
    let error = error.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let current = tx
                .query_row(
                    &format!(
                        "SELECT {COLUMNS} FROM messages
                         WHERE channel_id = ?1 AND provider_message_id = ?2"
                    ),
                    params![channel_id, provider_message_id],
                    row_to_message,
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(ReceiptOutcome::Unknown);
            };
            if !current.status.can_transition_to(status) {
                return Ok(ReceiptOutcome::Ignored(current));
            }
            tx.execute(
                "UPDATE messages SET status = ?2, error = COALESCE(?4, error),
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = ?3",
                params![
                    current.id,
                    status.to_string(),
                    current.status.to_string(),
                    error
                ],
            )?;
            sync_recipient(&tx, &current.id, status, error.as_deref())?;
            let updated = select_message(&tx, &current.id)?;
            tx.commit()?;
            Ok(match updated {
                Some(message) => ReceiptOutcome::Applied {
                    message,
                    previous: current.status,
                },
                None => ReceiptOutcome::Unknown,
            })
        })
        .await
        .map_err(crate::database::map_tr_err)
}
