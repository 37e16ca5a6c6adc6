// Database models - Search results and index statistics
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ranked search hit: the best-scoring segment of its recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub segment_id: i64,
    pub recording_id: Uuid,
    pub recording_title: String,
    pub start_time: f64,
    pub end_time: f64,
    pub segment_text: String,
    /// Excerpt with matched words wrapped in <mark> tags; equal to
    /// `segment_text` for fuzzy-only hits, where no match offsets exist
    pub snippet: String,
    pub relevance_score: f64,
    /// Matching segments of the same recording (exact pass), or the
    /// trigram match count (fuzzy pass)
    pub occurrence_count: i64,
    pub recording_created_at: DateTime<Utc>,
}

/// Counts of what a reconciliation pass actually did
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Recordings indexed for the first time
    pub indexed: usize,
    /// Recordings whose transcript was replaced wholesale
    pub reindexed: usize,
    /// Recordings removed because the external collection no longer has them
    pub purged: usize,
    /// Recordings untouched except for a title refresh
    pub refreshed: usize,
    /// Recordings skipped because their per-recording transaction failed
    pub failed: usize,
    /// Whether the batch ran as a full rebuild
    pub full_rebuild: bool,
    /// Whether the batch stopped early on the cancellation flag
    pub cancelled: bool,
}

impl ReconcileReport {
    /// Total add/update/remove operations; title refreshes do not count
    pub fn mutations(&self) -> usize {
        self.indexed + self.reindexed + self.purged
    }
}

/// Point-in-time counts over the persisted index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub recordings: i64,
    pub segments: i64,
    pub terms: i64,
    pub trigrams: i64,
    pub last_full_rebuild_at: Option<DateTime<Utc>>,
}
