// Public error type of the search engine

use thiserror::Error;

/// Errors surfaced across the engine boundary.
///
/// "No results" is never an error: searches over empty or unmatched input
/// return an empty list. These variants cover store-level failures only.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The persistent backing could not be initialized; the engine
    /// instance is unusable
    #[error("search store unavailable: {0:#}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// A read or write against the store failed for a reason other than
    /// "not found" (corruption, constraint violation, lock poisoning)
    #[error("search store statement failed: {0:#}")]
    Statement(#[source] anyhow::Error),

    /// The queried id does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
