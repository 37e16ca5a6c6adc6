// Database models - Recordings
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SegmentInput;

/// Cached metadata for one recording, refreshed whenever the reconciler
/// sees the recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMeta {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// One recording as reported by the external collection, the authoritative
/// source for what should be indexed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSnapshot {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    /// Bumped by the owning application whenever the transcript changes
    pub modified_at: DateTime<Utc>,
    pub segments: Vec<SegmentInput>,
}
