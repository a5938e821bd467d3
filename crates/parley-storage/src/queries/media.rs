// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Media blob storage keyed by message id.

use parley_core::ParleyError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::MediaBlob;

pub(crate) fn insert_blob(conn: &rusqlite::Connection, blob: &MediaBlob) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO media_blobs (message_id, mime_type, file_name, data)
         VALUES (?1, ?2, ?3, ?4)",
        params![blob.message_id, blob.mime_type, blob.file_name, blob.data],
    )?;
    Ok(())
}

/// Store (or replace) the blob for a message.
pub async fn put_media(db: &Database, blob: MediaBlob) -> Result<(), ParleyError> {
    db.connection()
        .call(move |conn| insert_blob(conn, &blob))
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch the blob for a message.
pub async fn get_media(db: &Database, message_id: &str) -> Result<Option<MediaBlob>, ParleyError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT message_id, mime_type, file_name, data FROM media_blobs WHERE message_id = ?1",
                params![message_id],
                |row| {
                    Ok(MediaBlob {
                        message_id: row.get(0)?,
                        mime_type: row.get(1)?,
                        file_name: row.get(2)?,
                        data: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(crate::database::map_tr_err)
}
