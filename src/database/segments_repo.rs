// Segments repository
// The segment store: one row per indexed transcript segment. The composite
// upsert keeps both inverted indexes in lockstep with the row inside the
// caller's transaction, so a crash can never strand orphaned postings.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::models::{IndexedSegment, SegmentInput};
use super::{parse_uuid, term_index, trigram_index, DatabaseManager};
use crate::{soundex, text};

impl DatabaseManager {
    /// Get a single indexed segment by id
    pub fn segment(&self, segment_id: i64) -> Result<Option<IndexedSegment>> {
        self.with_connection(|conn| {
            get_segment_impl(conn, segment_id)
        })
    }

    /// Get all indexed segments for a recording, in transcript order
    pub fn segments_for_recording(&self, recording_id: &Uuid) -> Result<Vec<IndexedSegment>> {
        self.with_connection(|conn| {
            segments_for_recording_impl(conn, recording_id)
        })
    }
}

/// Insert or replace the segment at `(recording_id, segment_index)` and
/// write its term and trigram postings. Re-indexing the same position
/// overwrites: the old row keeps its id and its stale postings are removed
/// first.
///
/// Segments whose text normalizes to nothing produce no postings and are
/// skipped entirely; returns the segment id otherwise.
pub(crate) fn upsert_and_index_segment(
    conn: &Connection,
    recording_id: &Uuid,
    segment_index: i64,
    input: &SegmentInput,
) -> Result<Option<i64>> {
    let tokens = text::normalize(&input.text);
    if tokens.is_empty() {
        log::debug!(
            "Skipping unsearchable segment {} of recording {}",
            segment_index,
            recording_id
        );
        return Ok(None);
    }

    let soundex_code = soundex::encode_text(&input.text);

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM segments WHERE recording_id = ?1 AND segment_index = ?2",
            params![recording_id.to_string(), segment_index],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to look up existing segment")?;

    let segment_id = match existing {
        Some(id) => {
            term_index::remove_segment(conn, id)?;
            trigram_index::remove_segment(conn, id)?;
            conn.execute(
                r#"
                UPDATE segments
                SET start_time = ?1, end_time = ?2, text = ?3, confidence = ?4,
                    soundex_code = ?5, token_count = ?6
                WHERE id = ?7
                "#,
                params![
                    input.start_time,
                    input.end_time,
                    input.text,
                    input.confidence,
                    soundex_code,
                    tokens.len() as i64,
                    id,
                ],
            ).context("Failed to replace segment")?;
            id
        }
        None => {
            conn.execute(
                r#"
                INSERT INTO segments (
                    recording_id, segment_index, start_time, end_time,
                    text, confidence, soundex_code, token_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    recording_id.to_string(),
                    segment_index,
                    input.start_time,
                    input.end_time,
                    input.text,
                    input.confidence,
                    soundex_code,
                    tokens.len() as i64,
                ],
            ).context("Failed to insert segment")?;
            conn.last_insert_rowid()
        }
    };

    term_index::index_segment(conn, segment_id, &tokens)?;
    trigram_index::index_segment(conn, segment_id, &text::trigrams(&input.text))?;

    Ok(Some(segment_id))
}

/// Remove every segment of a recording together with all of its postings.
/// Returns the number of segments removed.
pub(crate) fn deindex_recording_segments(conn: &Connection, recording_id: &Uuid) -> Result<usize> {
    let mut stmt = conn
        .prepare("SELECT id FROM segments WHERE recording_id = ?")
        .context("Failed to prepare segment id query")?;
    let ids: Vec<i64> = stmt
        .query_map(params![recording_id.to_string()], |row| row.get(0))
        .context("Failed to query segment ids")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect segment ids")?;

    for id in &ids {
        term_index::remove_segment(conn, *id)?;
        trigram_index::remove_segment(conn, *id)?;
    }

    conn.execute(
        "DELETE FROM segments WHERE recording_id = ?",
        params![recording_id.to_string()],
    ).context("Failed to delete segments")?;

    Ok(ids.len())
}

fn segment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(IndexedSegment, String)> {
    let recording_id: String = row.get(1)?;
    Ok((
        IndexedSegment {
            id: row.get(0)?,
            recording_id: Uuid::nil(), // replaced after parsing
            segment_index: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            text: row.get(5)?,
            confidence: row.get(6)?,
            soundex_code: row.get(7)?,
            token_count: row.get(8)?,
        },
        recording_id,
    ))
}

const SEGMENT_COLUMNS: &str =
    "id, recording_id, segment_index, start_time, end_time, text, confidence, soundex_code, token_count";

pub(crate) fn get_segment_impl(conn: &Connection, segment_id: i64) -> Result<Option<IndexedSegment>> {
    let result = conn
        .prepare(&format!("SELECT {} FROM segments WHERE id = ?", SEGMENT_COLUMNS))
        .context("Failed to prepare segment query")?
        .query_row(params![segment_id], segment_from_row)
        .optional()
        .context("Failed to read segment")?;

    match result {
        Some((mut segment, recording_id)) => {
            segment.recording_id = parse_uuid(&recording_id)?;
            Ok(Some(segment))
        }
        None => Ok(None),
    }
}

pub(crate) fn segments_for_recording_impl(
    conn: &Connection,
    recording_id: &Uuid,
) -> Result<Vec<IndexedSegment>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM segments WHERE recording_id = ? ORDER BY segment_index ASC",
            SEGMENT_COLUMNS
        ))
        .context("Failed to prepare segments query")?;

    let rows = stmt
        .query_map(params![recording_id.to_string()], segment_from_row)
        .context("Failed to query segments")?;

    let mut segments = Vec::new();
    for row in rows {
        let (mut segment, raw_id) = row.context("Failed to read segment row")?;
        segment.recording_id = parse_uuid(&raw_id)?;
        segments.push(segment);
    }
    Ok(segments)
}
