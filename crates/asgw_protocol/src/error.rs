//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while decoding protocol framing.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Binary query string ended inside a field.
    #[error("truncated binary query at offset {0}")]
    TruncatedQuery(usize),

    /// A query field exceeds what its one-byte length prefix can
    /// describe.
    #[error("{field} of {len} bytes exceeds the 255-byte field limit")]
    FieldTooLong {
        /// Name of the oversized field.
        field: &'static str,
        /// Actual length in bytes.
        len: usize,
    },

    /// Multipart frame was shorter than its own metadata claims.
    #[error("truncated multipart frame: need {needed} bytes, have {have}")]
    TruncatedFrame {
        /// Bytes the metadata requires.
        needed: usize,
        /// Bytes actually present.
        have: usize,
    },

    /// Multipart part metadata points outside the frame.
    #[error("part {index} range {offset}+{length} outside frame of {total} bytes")]
    BadPartRange {
        /// Part index.
        index: usize,
        /// Recorded offset.
        offset: usize,
        /// Recorded length.
        length: usize,
        /// Frame size.
        total: usize,
    },
}
