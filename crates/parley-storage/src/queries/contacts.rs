// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contact operations.
//!
//! `(channel_id, channel_identifier)` is UNIQUE; inserts report a conflict
//! instead of failing so callers can re-fetch the winning row.

use parley_core::ParleyError;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, is_constraint_violation};
use crate::models::{Contact, json_col, to_json};

const COLUMNS: &str = "id, channel_id, channel_identifier, display_name, phone, email,
                       profile_picture, custom_fields, created_at, updated_at";

fn row_to_contact(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        channel_identifier: row.get(2)?,
        display_name: row.get(3)?,
        phone: row.get(4)?,
        email: row.get(5)?,
        profile_picture: row.get(6)?,
        custom_fields: json_col(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Insert a contact. Returns `false` if the `(channel, identifier)` pair already exists.
pub async fn insert_contact(db: &Database, contact: &Contact) -> Result<bool, ParleyError> {
    let contact = contact.clone();
    db.connection()
        .call(move |conn| {
            let custom = to_json(&contact.custom_fields)?;
            let result = conn.execute(
                "INSERT INTO contacts (id, channel_id, channel_identifier, display_name, phone,
                                       email, profile_picture, custom_fields, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    contact.id,
                    contact.channel_id,
                    contact.channel_identifier,
                    contact.display_name,
                    contact.phone,
                    contact.email,
                    contact.profile_picture,
                    custom,
                    contact.created_at,
                    contact.updated_at,
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

/// Get a contact by id.
pub async fn get_contact(db: &Database, id: &str) -> Result<Option<Contact>, ParleyError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM contacts WHERE id = ?1"),
                params![id],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get a contact by channel identifier, following aliases left by upgrades and merges.
pub async fn get_contact_by_identifier(
    db: &Database,
    channel_id: &str,
    identifier: &str,
) -> Result<Option<Contact>, ParleyError> {
    let channel_id = channel_id.to_string();
    let identifier = identifier.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM contacts
                     WHERE channel_id = ?1 AND (
                         channel_identifier = ?2
                         OR id = (SELECT contact_id FROM contact_aliases
                                  WHERE channel_id = ?1 AND alias = ?2))
                     ORDER BY (channel_identifier = ?2) DESC
                     LIMIT 1"
                ),
                params![channel_id, identifier],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Identifiers that used to belong to a contact.
pub async fn list_aliases(db: &Database, contact_id: &str) -> Result<Vec<String>, ParleyError> {
    let contact_id = contact_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT alias FROM contact_aliases WHERE contact_id = ?1 ORDER BY created_at",
            )?;
            let rows = stmt.query_map(params![contact_id], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Find a contact on the channel carrying `phone`, other than `exclude_id`.
///
/// Phone-anchored rows are preferred over LID rows that merely know the phone.
pub async fn find_contact_by_phone(
    db: &Database,
    channel_id: &str,
    phone: &str,
    exclude_id: Option<&str>,
) -> Result<Option<Contact>, ParleyError> {
    let channel_id = channel_id.to_string();
    let phone = phone.to_string();
    let exclude_id = exclude_id.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM contacts
                     WHERE channel_id = ?1 AND phone = ?2 AND (?3 IS NULL OR id <> ?3)
                     ORDER BY (channel_identifier LIKE '%@lid') ASC, created_at ASC
                     LIMIT 1"
                ),
                params![channel_id, phone, exclude_id],
                row_to_contact,
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch several contacts by id, in no particular order. Unknown ids are skipped.
pub async fn get_contacts(db: &Database, ids: &[String]) -> Result<Vec<Contact>, ParleyError> {
    let ids = ids.to_vec();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM contacts WHERE id = ?1"))?;
            let mut contacts = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(contact) = stmt.query_row(params![id], row_to_contact).optional()? {
                    contacts.push(contact);
                }
            }
            Ok(contacts)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Overwrite the mutable fields of a contact.
///
/// A replaced identifier is kept as an alias so later events carrying it
/// still resolve here. Returns `false` if the new identifier collides with
/// another contact.
pub async fn update_contact(db: &Database, contact: &Contact) -> Result<bool, ParleyError> {
    let contact = contact.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let previous: Option<String> = tx
                .query_row(
                    "SELECT channel_identifier FROM contacts WHERE id = ?1",
                    params![contact.id],
                    |row| row.get(0),
                )
                .optional()?;
            let custom = to_json(&contact.custom_fields)?;
            let result = tx.execute(
                "UPDATE contacts SET channel_identifier = ?1, display_name = ?2, phone = ?3,
                        email = ?4, profile_picture = ?5, custom_fields = ?6,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?7",
                params![
                    contact.channel_identifier,
                    contact.display_name,
                    contact.phone,
                    contact.email,
                    contact.profile_picture,
                    custom,
                    contact.id,
                ],
            );
            match result {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => return Ok(false),
                Err(e) => return Err(e),
            }
            if let Some(old) = previous.filter(|old| *old != contact.channel_identifier) {
                insert_alias(&tx, &contact.channel_id, &old, &contact.id)?;
            }
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record `alias` as another identifier of `contact_id`. Re-pointing an existing alias is allowed.
pub async fn add_alias(
    db: &Database,
    channel_id: &str,
    alias: &str,
    contact_id: &str,
) -> Result<(), ParleyError> {
    let channel_id = channel_id.to_string();
    let alias = alias.to_string();
    let contact_id = contact_id.to_string();
    db.connection()
        .call(move |conn| insert_alias(conn, &channel_id, &alias, &contact_id))
        .await
        .map_err(crate::database::map_tr_err)
}

fn insert_alias(
    conn: &rusqlite::Connection,
    channel_id: &str,
    alias: &str,
    contact_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO contact_aliases (channel_id, alias, contact_id) VALUES (?1, ?2, ?3)
         ON CONFLICT (channel_id, alias) DO UPDATE SET contact_id = excluded.contact_id",
        params![channel_id, alias, contact_id],
    )?;
    Ok(())
}

/// Fold `absorbed_id` into `survivor` in one transaction.
///
/// Conversations and campaign recipients are re-parented (recipient rows that
/// would duplicate a survivor row are dropped), the survivor row is rewritten
/// with its merged fields, and the absorbed row is deleted.
pub async fn merge_contacts(
    db: &Database,
    survivor: &Contact,
    absorbed_id: &str,
) -> Result<(), ParleyError> {
    let survivor = survivor.clone();
    let absorbed_id = absorbed_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let absorbed_identifier: Option<String> = tx
                .query_row(
                    "SELECT channel_identifier FROM contacts WHERE id = ?1",
                    params![absorbed_id],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "UPDATE conversations SET contact_id = ?1,
                        auto_opened = CASE
                            WHEN status <> 'CLOSED' AND EXISTS (
                                SELECT 1 FROM conversations c
                                WHERE c.contact_id = ?1 AND c.channel_id = conversations.channel_id
                                  AND c.auto_opened = 1 AND c.status <> 'CLOSED')
                            THEN 0 ELSE auto_opened END,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE contact_id = ?2",
                params![survivor.id, absorbed_id],
            )?;
            tx.execute(
                "DELETE FROM campaign_recipients
                 WHERE contact_id = ?2 AND campaign_id IN (
                     SELECT campaign_id FROM campaign_recipients WHERE contact_id = ?1)",
                params![survivor.id, absorbed_id],
            )?;
            tx.execute(
                "UPDATE campaign_recipients SET contact_id = ?1 WHERE contact_id = ?2",
                params![survivor.id, absorbed_id],
            )?;
            tx.execute(
                "UPDATE contact_aliases SET contact_id = ?1 WHERE contact_id = ?2",
                params![survivor.id, absorbed_id],
            )?;
            tx.execute("DELETE FROM contacts WHERE id = ?1", params![absorbed_id])?;
            tx.execute(
                "UPDATE contacts SET channel_identifier = ?1, display_name = ?2, phone = ?3,
                        email = ?4, profile_picture = ?5, custom_fields = ?6,
                        updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?7",
                params![
                    survivor.channel_identifier,
                    survivor.display_name,
                    survivor.phone,
                    survivor.email,
                    survivor.profile_picture,
                    to_json(&survivor.custom_fields)?,
                    survivor.id,
                ],
            )?;
            if let Some(old) = absorbed_identifier.filter(|old| *old != survivor.channel_identifier) {
                insert_alias(&tx, &survivor.channel_id, &old, &survivor.id)?;
            }
            tx.commit()
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Count contacts on a channel.
pub async fn count_contacts(db: &Database, channel_id: &str) -> Result<i64, ParleyError> {
    let channel_id = channel_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM contacts WHERE channel_id = ?1",
                params![channel_id],
                |row| row.get(0),
            )
        })
        .await
        .map_err(crate::database::map_tr_err)
}
