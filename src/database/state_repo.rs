// Engine state repository
// Reconciliation bookkeeping: the per-recording indexed-at map and the
// JSON-encoded scalar state (rebuild date, one-shot migration flag)

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, DatabaseManager};

/// When the last full rebuild ran (RFC 3339 string)
pub const KEY_LAST_FULL_REBUILD_AT: &str = "last_full_rebuild_at";

/// One-shot flag: set once the schema-v2 soundex backfill rebuild has run
pub const KEY_SOUNDEX_BACKFILL_DONE: &str = "soundex_backfill_done";

impl DatabaseManager {
    /// Read a boolean engine state flag
    pub fn state_flag(&self, key: &str) -> Result<bool> {
        self.with_connection(|conn| get_flag_impl(conn, key))
    }

    /// Point-in-time counts over the persisted index
    pub fn index_stats(&self) -> Result<super::models::IndexStats> {
        self.with_connection(index_stats_impl)
    }
}

pub(crate) fn index_stats_impl(conn: &Connection) -> Result<super::models::IndexStats> {
    let recordings: i64 = conn
        .query_row("SELECT COUNT(*) FROM recordings", [], |row| row.get(0))
        .context("Failed to count recordings")?;
    let segments: i64 = conn
        .query_row("SELECT COUNT(*) FROM segments", [], |row| row.get(0))
        .context("Failed to count segments")?;
    let terms: i64 = conn
        .query_row("SELECT COUNT(DISTINCT term) FROM term_postings", [], |row| row.get(0))
        .context("Failed to count terms")?;
    let trigrams: i64 = conn
        .query_row("SELECT COUNT(DISTINCT trigram) FROM trigram_postings", [], |row| row.get(0))
        .context("Failed to count trigrams")?;

    Ok(super::models::IndexStats {
        recordings,
        segments,
        terms,
        trigrams,
        last_full_rebuild_at: get_timestamp_impl(conn, KEY_LAST_FULL_REBUILD_AT)?,
    })
}

pub(crate) fn get_state_impl(conn: &Connection, key: &str) -> Result<Option<serde_json::Value>> {
    let result = conn
        .prepare("SELECT value FROM engine_state WHERE key = ?")
        .context("Failed to prepare engine_state query")?
        .query_row(params![key], |row| row.get::<_, String>(0));

    match result {
        Ok(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid engine_state value for key {}", key))?;
            Ok(Some(value))
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read engine_state"),
    }
}

pub(crate) fn set_state_impl(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
    let raw = serde_json::to_string(value).context("Failed to encode engine_state value")?;
    conn.execute(
        r#"
        INSERT INTO engine_state (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![key, raw],
    ).context("Failed to write engine_state")?;

    Ok(())
}

pub(crate) fn get_flag_impl(conn: &Connection, key: &str) -> Result<bool> {
    Ok(matches!(get_state_impl(conn, key)?, Some(serde_json::Value::Bool(true))))
}

pub(crate) fn set_flag_impl(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_state_impl(conn, key, &serde_json::Value::Bool(value))
}

pub(crate) fn get_timestamp_impl(conn: &Connection, key: &str) -> Result<Option<DateTime<Utc>>> {
    match get_state_impl(conn, key)? {
        Some(serde_json::Value::String(s)) => Ok(Some(parse_timestamp(&s)?)),
        Some(other) => anyhow::bail!("Engine state key {} holds non-timestamp value: {}", key, other),
        None => Ok(None),
    }
}

pub(crate) fn set_timestamp_impl(conn: &Connection, key: &str, at: DateTime<Utc>) -> Result<()> {
    set_state_impl(conn, key, &serde_json::Value::String(at.to_rfc3339()))
}

/// Load the whole bookkeeping map: recording id -> last indexed at
pub(crate) fn indexed_recordings_impl(conn: &Connection) -> Result<HashMap<Uuid, DateTime<Utc>>> {
    let mut stmt = conn
        .prepare("SELECT recording_id, last_indexed_at FROM indexed_recordings")
        .context("Failed to prepare indexed_recordings query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("Failed to query indexed_recordings")?;

    let mut map = HashMap::new();
    for row in rows {
        let (id, at) = row.context("Failed to read indexed_recordings row")?;
        map.insert(parse_uuid(&id)?, parse_timestamp(&at)?);
    }
    Ok(map)
}

pub(crate) fn set_indexed_at_impl(
    conn: &Connection,
    recording_id: &Uuid,
    at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO indexed_recordings (recording_id, last_indexed_at) VALUES (?1, ?2)
        ON CONFLICT(recording_id) DO UPDATE SET last_indexed_at = excluded.last_indexed_at
        "#,
        params![recording_id.to_string(), at.to_rfc3339()],
    ).context("Failed to write indexed_recordings entry")?;

    Ok(())
}

pub(crate) fn remove_indexed_impl(conn: &Connection, recording_id: &Uuid) -> Result<()> {
    conn.execute(
        "DELETE FROM indexed_recordings WHERE recording_id = ?",
        params![recording_id.to_string()],
    ).context("Failed to delete indexed_recordings entry")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::database::migrations::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_flag_roundtrip() {
        let conn = setup();

        assert!(!get_flag_impl(&conn, KEY_SOUNDEX_BACKFILL_DONE).unwrap());
        set_flag_impl(&conn, KEY_SOUNDEX_BACKFILL_DONE, true).unwrap();
        assert!(get_flag_impl(&conn, KEY_SOUNDEX_BACKFILL_DONE).unwrap());
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let conn = setup();

        assert!(get_timestamp_impl(&conn, KEY_LAST_FULL_REBUILD_AT).unwrap().is_none());
        let at = Utc::now();
        set_timestamp_impl(&conn, KEY_LAST_FULL_REBUILD_AT, at).unwrap();
        let read = get_timestamp_impl(&conn, KEY_LAST_FULL_REBUILD_AT).unwrap().unwrap();
        assert_eq!(read.timestamp_millis(), at.timestamp_millis());
    }

    #[test]
    fn test_bookkeeping_map() {
        let conn = setup();

        let id = Uuid::new_v4();
        let at = Utc::now();
        set_indexed_at_impl(&conn, &id, at).unwrap();

        let map = indexed_recordings_impl(&conn).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&id));

        remove_indexed_impl(&conn, &id).unwrap();
        assert!(indexed_recordings_impl(&conn).unwrap().is_empty());
    }
}
