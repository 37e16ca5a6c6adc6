// Engine facade
// The public surface of the search engine: transcript indexing, the
// reconciliation entry point and ranked search. All calls funnel into the
// single serialized connection owned by the database manager.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use uuid::Uuid;

use crate::database::{
    DatabaseManager, IndexStats, IndexedSegment, RankingConfig, ReconcileReport,
    RecordingSnapshot, SearchResult, SegmentInput,
};
use crate::error::{EngineError, EngineResult};

/// Default number of search results when the caller has no preference
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// The transcript search engine.
///
/// One instance owns one index database. Mutations and searches are
/// serialized internally, so a search issued during a reindex sees either
/// the old or the new transcript, never a mix.
pub struct SearchEngine {
    db: DatabaseManager,
    ranking: RankingConfig,
}

impl SearchEngine {
    /// Open (creating if necessary) the index database at `db_path`.
    /// Failure here is fatal to the instance; there is no degraded mode.
    pub fn open(db_path: PathBuf) -> EngineResult<Self> {
        let db = DatabaseManager::new(db_path).map_err(EngineError::StoreUnavailable)?;
        Ok(Self {
            db,
            ranking: RankingConfig::default(),
        })
    }

    /// Open an engine backed by an in-memory database; state does not
    /// survive the instance. Mostly useful in tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let db = DatabaseManager::new_in_memory().map_err(EngineError::StoreUnavailable)?;
        Ok(Self {
            db,
            ranking: RankingConfig::default(),
        })
    }

    /// Override the ranking weights
    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    /// Index a freshly transcribed recording. Idempotent: indexing the
    /// same transcript twice leaves the same searchable state.
    pub fn index_transcript(
        &self,
        recording_id: &Uuid,
        segments: &[SegmentInput],
        title: &str,
        created_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.db
            .index_recording(recording_id, segments, title, created_at)
            .map_err(EngineError::Statement)
    }

    /// Replace a recording's transcript wholesale (remove + index)
    pub fn reindex_transcript(
        &self,
        recording_id: &Uuid,
        segments: &[SegmentInput],
        title: &str,
        created_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.db
            .reindex_recording(recording_id, segments, title, created_at)
            .map_err(EngineError::Statement)
    }

    /// Remove a recording and all of its index entries
    pub fn remove_transcript(&self, recording_id: &Uuid) -> EngineResult<()> {
        self.db
            .remove_recording(recording_id)
            .map_err(EngineError::Statement)
    }

    /// Reconcile the index against the full external recording collection
    pub fn rebuild_index(&self, snapshots: &[RecordingSnapshot]) -> EngineResult<ReconcileReport> {
        self.db
            .reconcile(snapshots, None)
            .map_err(EngineError::Statement)
    }

    /// Like [`rebuild_index`], checking `cancel` between per-recording
    /// transactions; a cancelled run reports how far it got.
    ///
    /// [`rebuild_index`]: SearchEngine::rebuild_index
    pub fn rebuild_index_with_cancel(
        &self,
        snapshots: &[RecordingSnapshot],
        cancel: &AtomicBool,
    ) -> EngineResult<ReconcileReport> {
        self.db
            .reconcile(snapshots, Some(cancel))
            .map_err(EngineError::Statement)
    }

    /// Refresh the cached title of a recording; no index change
    pub fn update_recording_title(&self, recording_id: &Uuid, title: &str) -> EngineResult<()> {
        self.db
            .update_recording_title(recording_id, title)
            .map_err(EngineError::Statement)
    }

    /// Ranked, typo-tolerant search. Returns at most `limit` results, one
    /// per recording, best first; empty input yields an empty list.
    pub fn search(&self, query: &str, limit: usize) -> EngineResult<Vec<SearchResult>> {
        self.db
            .search_segments(query, limit, &self.ranking)
            .map_err(EngineError::Statement)
    }

    /// Read back the indexed segments of a recording, in transcript order
    pub fn transcript(&self, recording_id: &Uuid) -> EngineResult<Vec<IndexedSegment>> {
        let known = self
            .db
            .recording_meta(recording_id)
            .map_err(EngineError::Statement)?
            .is_some();
        if !known {
            return Err(EngineError::NotFound(format!("recording {}", recording_id)));
        }
        self.db
            .segments_for_recording(recording_id)
            .map_err(EngineError::Statement)
    }

    /// Counts over the persisted index, for diagnostics surfaces
    pub fn stats(&self) -> EngineResult<IndexStats> {
        self.db.index_stats().map_err(EngineError::Statement)
    }

    /// Recompute ranking statistics and compact. Runs automatically after
    /// large reconciliation batches; callable explicitly as well.
    pub fn optimize(&self) -> EngineResult<()> {
        self.db.optimize().map_err(EngineError::Statement)
    }
}
