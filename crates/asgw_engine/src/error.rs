//! Error types for the engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Fatal engine failures.
///
/// Per-collection and per-command problems are reported through
/// status fields in the response, never through this type; only
/// failures that invalidate the whole request surface here.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The request document is missing a structurally required
    /// element.
    #[error("malformed request: missing {0}")]
    MissingElement(&'static str),

    /// A store operation failed in a way that cannot be reported as a
    /// per-collection status.
    #[error(transparent)]
    Store(#[from] asgw_store::StoreError),

    /// A payload document could not be produced.
    #[error(transparent)]
    Document(#[from] asgw_document::DocError),
}
