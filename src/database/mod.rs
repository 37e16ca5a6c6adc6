// Database module for the transcript search engine
// SQLite persistence for segments, both inverted indexes, the recording
// metadata cache and the reconciliation bookkeeping

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod manager;
pub mod migrations;
pub mod models;
pub mod recordings_repo;
pub mod reconciler;
pub mod search;
pub mod segments_repo;
pub mod state_repo;
pub mod term_index;
pub mod trigram_index;

pub use manager::DatabaseManager;
pub use models::*;
pub use search::RankingConfig;

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid recording id: {}", raw))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", raw))
}
