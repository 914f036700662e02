//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the store collaborators.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A write could not be completed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Collection id does not carry a known handler prefix.
    #[error("unknown handler for collection id {0:?}")]
    UnknownHandler(String),

    /// Mail could not be handed to the transport.
    #[error("mail submission failed: {0}")]
    Submission(String),
}
