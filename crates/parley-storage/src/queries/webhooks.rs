// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook subscription CRUD and the per-subscription execution log.

use parley_core::ParleyError;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::Database;
use crate::models::{WebhookExecution, WebhookSubscription, json_col, to_json};

const COLUMNS: &str = "id, name, url, events, secret, channel_id, active, created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, subscription_id, event_id, event_type, success, attempts,
                                 response_status, error, created_at";

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<WebhookSubscription> {
    Ok(WebhookSubscription {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        events: json_col(row, 3)?,
        secret: row.get(4)?,
        channel_id: row.get(5)?,
        active: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<WebhookExecution> {
    Ok(WebhookExecution {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        event_id: row.get(2)?,
        event_type: row.get(3)?,
        success: row.get(4)?,
        attempts: row.get(5)?,
        response_status: row.get(6)?,
        error: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Insert a subscription.
pub async fn insert_subscription(
    db: &Database,
    sub: &WebhookSubscription,
) -> Result<(), ParleyError> {
    let sub = sub.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO webhook_subscriptions (id, name, url, events, secret, channel_id,
                        active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    sub.id,
                    sub.name,
                    sub.url,
                    to_json(&sub.events)?,
                    sub.secret,
                    sub.channel_id,
                    sub.active,
                    sub.created_at,
                    sub.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a subscription by id.
pub async fn get_subscription(
    db: &Database,
    id: &str,
) -> Result<Option<WebhookSubscription>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM webhook_subscriptions WHERE id = ?1"),
                params![id],
                row_to_subscription,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// List subscriptions, optionally only the active ones.
pub async fn list_subscriptions(
    db: &Database,
    active_only: bool,
) -> Result<Vec<WebhookSubscription>, ParleyError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM webhook_subscriptions
                 WHERE (?1 = 0 OR active = 1)
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![active_only], row_to_subscription)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Overwrite a subscription. Returns `false` if it does not exist.
pub async fn update_subscription(
    db: &Database,
    sub: &WebhookSubscription,
) -> Result<bool, ParleyError> {
    let sub = sub.clone();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE webhook_subscriptions SET name = ?2, url = ?3, events = ?4, secret = ?5,
                        channel_id = ?6, active = ?7,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![
                    sub.id,
                    sub.name,
                    sub.url,
                    to_json(&sub.events)?,
                    sub.secret,
                    sub.channel_id,
                    sub.active,
                ],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete a subscription and its execution log. Returns `false` if it did not exist.
pub async fn delete_subscription(db: &Database, id: &str) -> Result<bool, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM webhook_executions WHERE subscription_id = ?1",
                params![id],
            )?;
            let changed = tx.execute("DELETE FROM webhook_subscriptions WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Append one delivery outcome to the execution log.
pub async fn insert_execution(db: &Database, exec: &WebhookExecution) -> Result<(), ParleyError> {
    let exec = exec.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO webhook_executions (id, subscription_id, event_id, event_type,
                        success, attempts, response_status, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    exec.id,
                    exec.subscription_id,
                    exec.event_id,
                    exec.event_type,
                    exec.success,
                    exec.attempts,
                    exec.response_status,
                    exec.error,
                    exec.created_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Most recent executions for a subscription, newest first.
pub async fn list_executions(
    db: &Database,
    subscription_id: &str,
    limit: i64,
) -> Result<Vec<WebhookExecution>, ParleyError> {
    let subscription_id = subscription_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM webhook_executions
                 WHERE subscription_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![subscription_id, limit], row_to_execution)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
