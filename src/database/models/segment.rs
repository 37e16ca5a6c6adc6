// Database models - Segments
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One transcript segment as supplied by the transcription pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentInput {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl SegmentInput {
    pub fn new(text: impl Into<String>, start_time: f64, end_time: f64) -> Self {
        Self {
            text: text.into(),
            start_time,
            end_time,
            confidence: 1.0,
        }
    }
}

/// A segment as stored in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedSegment {
    /// Engine-assigned id, monotonically increasing, stable while indexed
    pub id: i64,
    pub recording_id: Uuid,
    /// Zero-based position within the recording's transcript
    pub segment_index: i64,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
    /// Recognizer confidence in [0, 1]; preserved but not ranked on
    pub confidence: f64,
    /// Up to 3 space-joined soundex codes of the leading words
    pub soundex_code: String,
    /// Normalized word count, used for length normalization in ranking
    pub token_count: i64,
}
