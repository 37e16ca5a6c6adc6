// Database migrations for the transcript search engine
// Creates and updates the index schema

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Run all necessary migrations to bring the database up to date
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version from the database
fn get_schema_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    ).unwrap_or(false);

    if !table_exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    ).unwrap_or(0);

    Ok(version)
}

/// Initial schema creation (version 1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    log::info!("Running search index migration v1");

    conn.execute_batch(r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Recording metadata cache: avoids re-querying the external
        -- collection for every search result
        CREATE TABLE IF NOT EXISTS recordings (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Indexed transcript segments. AUTOINCREMENT keeps segment ids
        -- monotonically increasing even across deletes.
        CREATE TABLE IF NOT EXISTS segments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recording_id TEXT NOT NULL,
            segment_index INTEGER NOT NULL,
            start_time REAL NOT NULL,
            end_time REAL NOT NULL,
            text TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 1.0,
            token_count INTEGER NOT NULL,
            UNIQUE (recording_id, segment_index),
            FOREIGN KEY (recording_id) REFERENCES recordings(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_segments_recording_id
        ON segments(recording_id);

        -- Term index postings with per-segment term frequency
        CREATE TABLE IF NOT EXISTS term_postings (
            term TEXT NOT NULL,
            segment_id INTEGER NOT NULL,
            term_frequency INTEGER NOT NULL,
            PRIMARY KEY (term, segment_id)
        );

        CREATE INDEX IF NOT EXISTS idx_term_postings_segment
        ON term_postings(segment_id);

        -- Trigram index postings, presence only
        CREATE TABLE IF NOT EXISTS trigram_postings (
            trigram TEXT NOT NULL,
            segment_id INTEGER NOT NULL,
            PRIMARY KEY (trigram, segment_id)
        );

        CREATE INDEX IF NOT EXISTS idx_trigram_postings_segment
        ON trigram_postings(segment_id);

        -- Corpus-wide statistics for ranking, maintained incrementally
        CREATE TABLE IF NOT EXISTS corpus_stats (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            total_segments INTEGER NOT NULL DEFAULT 0,
            total_tokens INTEGER NOT NULL DEFAULT 0
        );

        INSERT OR IGNORE INTO corpus_stats (id, total_segments, total_tokens)
        VALUES (1, 0, 0);

        -- Reconciliation bookkeeping: which recordings are indexed, and when
        CREATE TABLE IF NOT EXISTS indexed_recordings (
            recording_id TEXT PRIMARY KEY NOT NULL,
            last_indexed_at TEXT NOT NULL
        );

        -- Engine-wide scalar state, JSON-encoded values
        CREATE TABLE IF NOT EXISTS engine_state (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        );

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
    "#).context("Failed to run migration v1")?;

    log::info!("Migration v1 completed successfully");
    Ok(())
}

/// Stored phonetic codes (version 2)
///
/// Segments indexed before this version carry no soundex code; the
/// reconciler forces one full rebuild to backfill them, gated by the
/// `soundex_backfill_done` engine state flag.
fn migrate_v2(conn: &Connection) -> Result<()> {
    log::info!("Running search index migration v2 - Stored soundex codes");

    conn.execute_batch(r#"
        ALTER TABLE segments ADD COLUMN soundex_code TEXT NOT NULL DEFAULT '';

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
    "#).context("Failed to run migration v2")?;

    log::info!("Migration v2 completed successfully");
    Ok(())
}
