// Recordings repository
// Maintains the cached title/creation-time metadata for each recording

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::models::RecordingMeta;
use super::{parse_timestamp, parse_uuid, DatabaseManager};

impl DatabaseManager {
    /// Get the cached metadata for a recording
    pub fn recording_meta(&self, recording_id: &Uuid) -> Result<Option<RecordingMeta>> {
        self.with_connection(|conn| {
            get_recording_impl(conn, recording_id)
        })
    }

    /// Refresh the cached title for a recording; a no-op for unknown ids.
    /// Touches neither index, titles are display-only.
    pub fn update_recording_title(&self, recording_id: &Uuid, title: &str) -> Result<()> {
        self.with_connection(|conn| {
            update_title_impl(conn, recording_id, title).map(|_| ())
        })
    }
}

pub(crate) fn upsert_recording_impl(conn: &Connection, meta: &RecordingMeta) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO recordings (id, title, created_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            created_at = excluded.created_at
        "#,
        params![
            meta.id.to_string(),
            meta.title,
            meta.created_at.to_rfc3339(),
        ],
    ).context("Failed to upsert recording metadata")?;

    Ok(())
}

/// Refresh only the cached title. Returns the number of rows touched, so
/// callers can tell whether the recording was known at all.
pub(crate) fn update_title_impl(conn: &Connection, recording_id: &Uuid, title: &str) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE recordings SET title = ? WHERE id = ?",
        params![title, recording_id.to_string()],
    ).context("Failed to update recording title")?;

    Ok(updated)
}

pub(crate) fn delete_recording_impl(conn: &Connection, recording_id: &Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM recordings WHERE id = ?",
        params![recording_id.to_string()],
    ).context("Failed to delete recording metadata")?;

    Ok(())
}

pub(crate) fn get_recording_impl(conn: &Connection, recording_id: &Uuid) -> Result<Option<RecordingMeta>> {
    let result = conn
        .prepare("SELECT id, title, created_at FROM recordings WHERE id = ?")
        .context("Failed to prepare recording query")?
        .query_row(params![recording_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        });

    match result {
        Ok((id, title, created_at)) => Ok(Some(RecordingMeta {
            id: parse_uuid(&id)?,
            title,
            created_at: parse_timestamp(&created_at)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read recording metadata"),
    }
}
