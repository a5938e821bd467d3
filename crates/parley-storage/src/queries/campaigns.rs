// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign and recipient operations.
//!
//! Campaign counters are never stored; `campaign_counts` aggregates the
//! recipient rows on every read.

use parley_core::ParleyError;
use parley_core::types::CampaignStatus;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::Database;
use crate::models::{Campaign, CampaignCounts, CampaignRecipient, enum_col};

const COLUMNS: &str = "id, name, channel_id, template, status, scheduled_for, created_by,
                       started_at, completed_at, created_at, updated_at";

const RECIPIENT_COLUMNS: &str =
    "id, campaign_id, contact_id, message_id, status, error, created_at, updated_at";

fn row_to_campaign(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_id: row.get(2)?,
        template: row.get(3)?,
        status: enum_col(row, 4)?,
        scheduled_for: row.get(5)?,
        created_by: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_recipient(row: &Row<'_>) -> rusqlite::Result<CampaignRecipient> {
    Ok(CampaignRecipient {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        contact_id: row.get(2)?,
        message_id: row.get(3)?,
        status: enum_col(row, 4)?,
        error: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn select_campaign(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Campaign>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM campaigns WHERE id = ?1"),
        params![id],
        row_to_campaign,
    )
    .optional()
}

/// Insert a new campaign.
pub async fn insert_campaign(db: &Database, campaign: &Campaign) -> Result<(), ParleyError> {
    let c = campaign.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO campaigns (id, name, channel_id, template, status, scheduled_for,
                        created_by, started_at, completed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    c.id,
                    c.name,
                    c.channel_id,
                    c.template,
                    c.status.to_string(),
                    c.scheduled_for,
                    c.created_by,
                    c.started_at,
                    c.completed_at,
                    c.created_at,
                    c.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a campaign by id.
pub async fn get_campaign(db: &Database, id: &str) -> Result<Option<Campaign>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| select_campaign(conn, &id))
        .await
        .map_err(crate::database::map_tr_err)
}

/// List campaigns, newest first.
pub async fn list_campaigns(
    db: &Database,
    limit: i64,
    offset: i64,
) -> Result<Vec<Campaign>, ParleyError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM campaigns ORDER BY created_at DESC, id ASC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit, offset], row_to_campaign)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Move a campaign to `to` if it is currently in one of `from`.
///
/// Stamps `started_at` on SENDING and `completed_at` on COMPLETED/CANCELLED.
/// `scheduled_for` replaces the stored value when given. Returns `None` when
/// the campaign is missing or not in an allowed source state.
pub async fn transition(
    db: &Database,
    id: &str,
    from: &[CampaignStatus],
    to: CampaignStatus,
    scheduled_for: Option<&str>,
) -> Result<Option<Campaign>, ParleyError> {
    let id = id.to_string();
    let from: Vec<String> = from.iter().map(ToString::to_string).collect();
    let scheduled_for = scheduled_for.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let Some(current) = select_campaign(&tx, &id)? else {
                return Ok(None);
            };
            if !from.contains(&current.status.to_string()) {
                return Ok(None);
            }
            tx.execute(
                "UPDATE campaigns SET status = ?2,
                        scheduled_for = COALESCE(?3, scheduled_for),
                        started_at = CASE WHEN ?2 = 'SENDING' AND started_at IS NULL
                                          THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                                          ELSE started_at END,
                        completed_at = CASE WHEN ?2 IN ('COMPLETED', 'CANCELLED')
                                            THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                                            ELSE completed_at END,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = ?4",
                params![id, to.to_string(), scheduled_for, current.status.to_string()],
            )?;
            let updated = select_campaign(&tx, &id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// SCHEDULED campaigns whose `scheduled_for` has passed.
pub async fn due_scheduled(db: &Database) -> Result<Vec<Campaign>, ParleyError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM campaigns
                 WHERE status = 'SCHEDULED'
                   AND scheduled_for <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 ORDER BY scheduled_for ASC"
            ))?;
            let rows = stmt.query_map([], row_to_campaign)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Campaigns left in SENDING, oldest start first.
pub async fn sending_campaigns(db: &Database) -> Result<Vec<Campaign>, ParleyError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM campaigns
                 WHERE status = 'SENDING'
                 ORDER BY started_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map([], row_to_campaign)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Add recipients, skipping contacts already on the campaign.
///
/// Returns the number of rows actually inserted.
pub async fn add_recipients(
    db: &Database,
    campaign_id: &str,
    contact_ids: &[String],
) -> Result<usize, ParleyError> {
    let campaign_id = campaign_id.to_string();
    let contact_ids = contact_ids.to_vec();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO campaign_recipients (id, campaign_id, contact_id)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT (campaign_id, contact_id) DO NOTHING",
                )?;
                for contact_id in &contact_ids {
                    let id = uuid::Uuid::new_v4().to_string();
                    inserted += stmt.execute(params![id, campaign_id, contact_id])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All recipients of a campaign in insertion order.
pub async fn list_recipients(
    db: &Database,
    campaign_id: &str,
) -> Result<Vec<CampaignRecipient>, ParleyError> {
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients
                 WHERE campaign_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![campaign_id], row_to_recipient)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Recipients that have not been handed to the pipeline yet.
pub async fn unsent_recipients(
    db: &Database,
    campaign_id: &str,
) -> Result<Vec<CampaignRecipient>, ParleyError> {
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECIPIENT_COLUMNS} FROM campaign_recipients
                 WHERE campaign_id = ?1 AND message_id IS NULL AND status = 'PENDING'
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map(params![campaign_id], row_to_recipient)?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark a recipient FAILED before any message was created for it.
pub async fn fail_recipient(
    db: &Database,
    recipient_id: &str,
    error: &str,
) -> Result<(), ParleyError> {
    let recipient_id = recipient_id.to_string();
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaign_recipients SET status = 'FAILED', error = ?2,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'PENDING'",
                params![recipient_id, error],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Aggregate counters over the recipient rows.
///
/// A recipient counts as sent once its message left the system, so DELIVERED
/// and READ recipients are included in `sent_count`.
pub async fn campaign_counts(db: &Database, campaign_id: &str) -> Result<CampaignCounts, ParleyError> {
    let campaign_id = campaign_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'PENDING'), 0),
                        COALESCE(SUM(status IN ('SENT', 'DELIVERED', 'READ')), 0),
                        COALESCE(SUM(status IN ('DELIVERED', 'READ')), 0),
                        COALESCE(SUM(status = 'READ'), 0),
                        COALESCE(SUM(status = 'FAILED'), 0)
                 FROM campaign_recipients WHERE campaign_id = ?1",
                params![campaign_id],
                |row| {
                    Ok(CampaignCounts {
                        total_recipients: row.get(0)?,
                        pending_count: row.get(1)?,
                        sent_count: row.get(2)?,
                        delivered_count: row.get(3)?,
                        read_count: row.get(4)?,
                        failed_count: row.get(5)?,
                    })
                },
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}
