// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbox jobs for crash-safe outbound delivery.
//!
//! Each outbound message owns one job. Workers claim due jobs by moving them
//! to `processing` with a lock deadline; a job whose lock expired (worker
//! crashed mid-attempt) becomes claimable again.

use parley_core::ParleyError;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::Database;
use crate::models::OutboxEntry;

const COLUMNS: &str = "id, message_id, status, attempts, next_attempt_at, locked_until,
                       last_error, created_at, updated_at";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: row.get(0)?,
        message_id: row.get(1)?,
        status: row.get(2)?,
        attempts: row.get(3)?,
        next_attempt_at: row.get(4)?,
        locked_until: row.get(5)?,
        last_error: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Claim up to `limit` due jobs, locking each for `lock_secs`.
pub async fn claim_due(
    db: &Database,
    limit: i64,
    lock_secs: u64,
) -> Result<Vec<OutboxEntry>, ParleyError> {
    let lock = format!("+{lock_secs} seconds");
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let entries: Vec<OutboxEntry> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {COLUMNS} FROM outbox
                     WHERE (status = 'pending'
                            AND next_attempt_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                        OR (status = 'processing'
                            AND locked_until < strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                     ORDER BY next_attempt_at ASC, id ASC
                     LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], row_to_entry)?;
                rows.collect::<rusqlite::Result<_>>()?
            };
            let mut claimed = Vec::with_capacity(entries.len());
            for entry in entries {
                tx.execute(
                    "UPDATE outbox SET status = 'processing',
                            locked_until = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?2),
                            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1",
                    params![entry.id, lock],
                )?;
                claimed.push(OutboxEntry {
                    status: "processing".to_string(),
                    ..entry
                });
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get the job for a message.
pub async fn get_entry(db: &Database, message_id: &str) -> Result<Option<OutboxEntry>, ParleyError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM outbox WHERE message_id = ?1"),
                params![message_id],
                row_to_entry,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Close a job whose message no longer needs sending.
pub async fn complete(db: &Database, message_id: &str) -> Result<(), ParleyError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE outbox SET status = 'completed', locked_until = NULL,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE message_id = ?1 AND status IN ('pending', 'processing')",
                params![message_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Make a job due immediately (manual resend) unless it is finished.
pub async fn make_due(db: &Database, message_id: &str) -> Result<(), ParleyError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE outbox SET next_attempt_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE message_id = ?1 AND status = 'pending'",
                params![message_id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Number of jobs per status, for health reporting.
pub async fn count_by_status(db: &Database) -> Result<Vec<(String, i64)>, ParleyError> {
    db.connection()
        .call(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM outbox GROUP BY status ORDER BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
