// Incremental reconciler
// Diffs the external recording collection against the engine's bookkeeping
// and applies the minimal set of index changes, one transaction per
// recording. Falls back to a full rebuild on first run or while the
// one-shot soundex backfill flag is unset.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::models::{RecordingMeta, RecordingSnapshot, ReconcileReport, SegmentInput};
use super::state_repo::{KEY_LAST_FULL_REBUILD_AT, KEY_SOUNDEX_BACKFILL_DONE};
use super::{recordings_repo, segments_repo, state_repo, DatabaseManager};

/// Reconciliation batches touching more than this many recordings trigger
/// an optimization pass afterwards
pub(crate) const OPTIMIZE_THRESHOLD: usize = 100;

impl DatabaseManager {
    /// Index a recording's transcript: metadata cache, segment rows, both
    /// indexes and the bookkeeping entry, all in one transaction.
    pub fn index_recording(
        &self,
        recording_id: &Uuid,
        segments: &[SegmentInput],
        title: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_connection(|conn| {
            index_recording_impl(conn, recording_id, segments, title, created_at, false)
        })
    }

    /// Replace a recording's transcript wholesale (delete then reinsert)
    pub fn reindex_recording(
        &self,
        recording_id: &Uuid,
        segments: &[SegmentInput],
        title: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_connection(|conn| {
            index_recording_impl(conn, recording_id, segments, title, created_at, true)
        })
    }

    /// Remove a recording and every trace of it from both indexes
    pub fn remove_recording(&self, recording_id: &Uuid) -> Result<()> {
        self.with_connection(|conn| {
            purge_recording_impl(conn, recording_id)
        })
    }

    /// Run the reconciliation state machine over the full external
    /// collection. `cancel` is checked between per-recording transactions.
    pub fn reconcile(
        &self,
        snapshots: &[RecordingSnapshot],
        cancel: Option<&AtomicBool>,
    ) -> Result<ReconcileReport> {
        self.with_connection(|conn| {
            reconcile_impl(conn, snapshots, cancel)
        })
    }

    /// Recompute ranking statistics from ground truth and let SQLite
    /// re-evaluate its query planner statistics
    pub fn optimize(&self) -> Result<()> {
        self.with_connection(optimize_impl)
    }
}

fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map(|flag| flag.load(Ordering::Relaxed)).unwrap_or(false)
}

/// Insert (or, with `replace`, delete-then-reinsert) one recording's
/// segments inside a single transaction, so a crash mid-write never leaves
/// the indexes inconsistent with the store.
pub(crate) fn index_recording_impl(
    conn: &Connection,
    recording_id: &Uuid,
    segments: &[SegmentInput],
    title: &str,
    created_at: DateTime<Utc>,
    replace: bool,
) -> Result<()> {
    let tx = conn.unchecked_transaction()
        .context("Failed to start indexing transaction")?;

    if replace {
        segments_repo::deindex_recording_segments(&tx, recording_id)?;
    }

    recordings_repo::upsert_recording_impl(&tx, &RecordingMeta {
        id: *recording_id,
        title: title.to_string(),
        created_at,
    })?;

    for (index, segment) in segments.iter().enumerate() {
        segments_repo::upsert_and_index_segment(&tx, recording_id, index as i64, segment)?;
    }

    state_repo::set_indexed_at_impl(&tx, recording_id, Utc::now())?;

    tx.commit().context("Failed to commit indexing transaction")?;
    Ok(())
}

/// Delete a recording's segments, postings, metadata and bookkeeping entry
pub(crate) fn purge_recording_impl(conn: &Connection, recording_id: &Uuid) -> Result<()> {
    let tx = conn.unchecked_transaction()
        .context("Failed to start purge transaction")?;

    segments_repo::deindex_recording_segments(&tx, recording_id)?;
    recordings_repo::delete_recording_impl(&tx, recording_id)?;
    state_repo::remove_indexed_impl(&tx, recording_id)?;

    tx.commit().context("Failed to commit purge transaction")?;
    Ok(())
}

pub(crate) fn reconcile_impl(
    conn: &Connection,
    snapshots: &[RecordingSnapshot],
    cancel: Option<&AtomicBool>,
) -> Result<ReconcileReport> {
    let backfill_done = state_repo::get_flag_impl(conn, KEY_SOUNDEX_BACKFILL_DONE)?;

    let report = if backfill_done {
        incremental_reconcile(conn, snapshots, cancel)?
    } else {
        full_rebuild(conn, snapshots, cancel)?
    };

    log::info!(
        "Reconciliation done: {} indexed, {} reindexed, {} purged, {} refreshed, {} failed{}",
        report.indexed,
        report.reindexed,
        report.purged,
        report.refreshed,
        report.failed,
        if report.cancelled { " (cancelled)" } else { "" },
    );

    if report.mutations() > OPTIMIZE_THRESHOLD {
        optimize_impl(conn)?;
    }

    Ok(report)
}

fn incremental_reconcile(
    conn: &Connection,
    snapshots: &[RecordingSnapshot],
    cancel: Option<&AtomicBool>,
) -> Result<ReconcileReport> {
    let bookkeeping = state_repo::indexed_recordings_impl(conn)?;
    let mut report = ReconcileReport::default();
    let mut seen: HashSet<Uuid> = HashSet::with_capacity(snapshots.len());

    for snapshot in snapshots {
        if cancelled(cancel) {
            report.cancelled = true;
            return Ok(report);
        }
        seen.insert(snapshot.id);

        match bookkeeping.get(&snapshot.id) {
            // Unseen: first-time index
            None => {
                match index_recording_impl(
                    conn,
                    &snapshot.id,
                    &snapshot.segments,
                    &snapshot.title,
                    snapshot.created_at,
                    false,
                ) {
                    Ok(()) => report.indexed += 1,
                    Err(e) => {
                        log::warn!("Failed to index recording {}: {:#}", snapshot.id, e);
                        report.failed += 1;
                    }
                }
            }
            // Stale: the transcript changed after we last indexed it.
            // Transcripts are replaced wholesale on edit, so no per-segment
            // diffing.
            Some(last_indexed) if snapshot.modified_at > *last_indexed => {
                match index_recording_impl(
                    conn,
                    &snapshot.id,
                    &snapshot.segments,
                    &snapshot.title,
                    snapshot.created_at,
                    true,
                ) {
                    Ok(()) => report.reindexed += 1,
                    Err(e) => {
                        log::warn!("Failed to reindex recording {}: {:#}", snapshot.id, e);
                        report.failed += 1;
                    }
                }
            }
            // Current: titles can change without touching the transcript
            Some(_) => {
                match recordings_repo::update_title_impl(conn, &snapshot.id, &snapshot.title) {
                    Ok(_) => report.refreshed += 1,
                    Err(e) => {
                        log::warn!("Failed to refresh title of recording {}: {:#}", snapshot.id, e);
                        report.failed += 1;
                    }
                }
            }
        }
    }

    // Purge recordings the external collection no longer has
    for recording_id in bookkeeping.keys() {
        if seen.contains(recording_id) {
            continue;
        }
        if cancelled(cancel) {
            report.cancelled = true;
            return Ok(report);
        }
        match purge_recording_impl(conn, recording_id) {
            Ok(()) => report.purged += 1,
            Err(e) => {
                log::warn!("Failed to purge recording {}: {:#}", recording_id, e);
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

/// Clear all derived state and re-index everything. Runs on the first ever
/// reconciliation and once after the schema gained stored soundex codes;
/// the flags are only written when the rebuild ran to completion.
fn full_rebuild(
    conn: &Connection,
    snapshots: &[RecordingSnapshot],
    cancel: Option<&AtomicBool>,
) -> Result<ReconcileReport> {
    log::info!("Running full index rebuild over {} recordings", snapshots.len());

    let tx = conn.unchecked_transaction()
        .context("Failed to start rebuild clear transaction")?;
    tx.execute_batch(
        r#"
        DELETE FROM term_postings;
        DELETE FROM trigram_postings;
        DELETE FROM segments;
        DELETE FROM recordings;
        DELETE FROM indexed_recordings;
        UPDATE corpus_stats SET total_segments = 0, total_tokens = 0 WHERE id = 1;
        "#,
    ).context("Failed to clear index state for rebuild")?;
    tx.commit().context("Failed to commit rebuild clear")?;

    let mut report = ReconcileReport {
        full_rebuild: true,
        ..ReconcileReport::default()
    };

    for snapshot in snapshots {
        if cancelled(cancel) {
            report.cancelled = true;
            return Ok(report);
        }
        match index_recording_impl(
            conn,
            &snapshot.id,
            &snapshot.segments,
            &snapshot.title,
            snapshot.created_at,
            false,
        ) {
            Ok(()) => report.indexed += 1,
            Err(e) => {
                log::warn!("Failed to index recording {} during rebuild: {:#}", snapshot.id, e);
                report.failed += 1;
            }
        }
    }

    state_repo::set_flag_impl(conn, KEY_SOUNDEX_BACKFILL_DONE, true)?;
    state_repo::set_timestamp_impl(conn, KEY_LAST_FULL_REBUILD_AT, Utc::now())?;

    Ok(report)
}

pub(crate) fn optimize_impl(conn: &Connection) -> Result<()> {
    log::info!("Optimizing search index");

    conn.execute(
        r#"
        UPDATE corpus_stats
        SET total_segments = (SELECT COUNT(*) FROM segments),
            total_tokens = (SELECT COALESCE(SUM(token_count), 0) FROM segments)
        WHERE id = 1
        "#,
        [],
    ).context("Failed to recompute corpus statistics")?;

    conn.execute_batch("PRAGMA optimize;")
        .context("Failed to run PRAGMA optimize")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> DatabaseManager {
        DatabaseManager::new_in_memory().unwrap()
    }

    fn snapshot(id: Uuid, title: &str, texts: &[&str], modified_at: DateTime<Utc>) -> RecordingSnapshot {
        RecordingSnapshot {
            id,
            title: title.to_string(),
            created_at: modified_at - Duration::minutes(5),
            modified_at,
            segments: texts
                .iter()
                .enumerate()
                .map(|(i, t)| SegmentInput::new(*t, i as f64, i as f64 + 1.0))
                .collect(),
        }
    }

    #[test]
    fn test_first_reconcile_is_full_rebuild() {
        let db = setup();
        let id = Uuid::new_v4();
        let report = db
            .reconcile(&[snapshot(id, "One", &["guitar practice"], Utc::now())], None)
            .unwrap();

        assert!(report.full_rebuild);
        assert_eq!(report.indexed, 1);
        assert!(db.state_flag(KEY_SOUNDEX_BACKFILL_DONE).unwrap());
    }

    #[test]
    fn test_incremental_indexes_only_the_new_recording() {
        let db = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Utc::now();

        let first = vec![snapshot(a, "A", &["alpha words"], now)];
        db.reconcile(&first, None).unwrap();

        let mut second = first.clone();
        second.push(snapshot(b, "B", &["bravo words"], now));
        let report = db.reconcile(&second, None).unwrap();

        assert!(!report.full_rebuild);
        assert_eq!(report.indexed, 1);
        assert_eq!(report.reindexed, 0);
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.purged, 0);
    }

    #[test]
    fn test_stale_recording_is_reindexed_wholesale() {
        let db = setup();
        let id = Uuid::new_v4();
        let now = Utc::now();

        db.reconcile(&[snapshot(id, "Rec", &["first version text"], now)], None)
            .unwrap();

        let edited = snapshot(id, "Rec", &["second version text"], now + Duration::hours(1));
        let report = db.reconcile(&[edited], None).unwrap();
        assert_eq!(report.reindexed, 1);

        let segments = db.segments_for_recording(&id).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "second version text");
    }

    #[test]
    fn test_vanished_recording_is_purged() {
        let db = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Utc::now();

        db.reconcile(
            &[
                snapshot(a, "A", &["alpha words"], now),
                snapshot(b, "B", &["bravo words"], now),
            ],
            None,
        ).unwrap();

        let report = db
            .reconcile(&[snapshot(a, "A", &["alpha words"], now)], None)
            .unwrap();
        assert_eq!(report.purged, 1);

        assert!(db.segments_for_recording(&b).unwrap().is_empty());
        assert!(db.recording_meta(&b).unwrap().is_none());

        // No orphaned postings anywhere
        db.with_connection(|conn| {
            let orphans: i64 = conn.query_row(
                "SELECT COUNT(*) FROM term_postings WHERE segment_id NOT IN (SELECT id FROM segments)",
                [],
                |row| row.get(0),
            )?;
            assert_eq!(orphans, 0);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn test_title_refresh_without_reindex() {
        let db = setup();
        let id = Uuid::new_v4();
        let now = Utc::now();

        db.reconcile(&[snapshot(id, "Old title", &["some words"], now)], None)
            .unwrap();

        // Same modified_at, new title
        let report = db
            .reconcile(&[snapshot(id, "New title", &["some words"], now)], None)
            .unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.reindexed, 0);
        assert_eq!(db.recording_meta(&id).unwrap().unwrap().title, "New title");
    }

    #[test]
    fn test_cancellation_between_recordings() {
        let db = setup();
        // Seed so the second call takes the incremental path
        db.reconcile(&[], None).unwrap();

        let cancel = AtomicBool::new(true);
        let snapshots = vec![
            snapshot(Uuid::new_v4(), "A", &["alpha"], Utc::now()),
            snapshot(Uuid::new_v4(), "B", &["bravo"], Utc::now()),
        ];
        let report = db.reconcile(&snapshots, Some(&cancel)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.indexed, 0);
    }

    #[test]
    fn test_rebuild_runs_once_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let id = Uuid::new_v4();
        let now = Utc::now();

        {
            let db = DatabaseManager::new(path.clone()).unwrap();
            let report = db
                .reconcile(&[snapshot(id, "Rec", &["guitar practice"], now)], None)
                .unwrap();
            assert!(report.full_rebuild);
        }

        // Reopen the same file: the flag survived, no second rebuild
        let db = DatabaseManager::new(path).unwrap();
        let report = db
            .reconcile(&[snapshot(id, "Rec", &["guitar practice"], now)], None)
            .unwrap();
        assert!(!report.full_rebuild);
        assert_eq!(report.indexed, 0);
        assert_eq!(report.refreshed, 1);
    }

    #[test]
    fn test_optimize_recomputes_stats_from_ground_truth() {
        let db = setup();
        let id = Uuid::new_v4();
        db.reconcile(&[snapshot(id, "Rec", &["one two three", "four five"], Utc::now())], None)
            .unwrap();

        // Corrupt the cached stats, then optimize
        db.with_connection(|conn| {
            conn.execute(
                "UPDATE corpus_stats SET total_segments = 99, total_tokens = 999 WHERE id = 1",
                [],
            )?;
            Ok(())
        }).unwrap();

        db.optimize().unwrap();

        db.with_connection(|conn| {
            let (segments, tokens): (i64, i64) = conn.query_row(
                "SELECT total_segments, total_tokens FROM corpus_stats WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            assert_eq!(segments, 2);
            assert_eq!(tokens, 5);
            Ok(())
        }).unwrap();
    }
}
