//! Error types for document handling.

use thiserror::Error;

/// Result type for document operations.
pub type DocResult<T> = Result<T, DocError>;

/// Errors that can occur while parsing or encoding documents.
#[derive(Error, Debug)]
pub enum DocError {
    /// XML could not be parsed.
    #[error("xml parse error: {0}")]
    Xml(String),

    /// Binary document data ended unexpectedly.
    #[error("truncated binary document at offset {offset}")]
    Truncated {
        /// Offset the decoder had reached.
        offset: usize,
        /// The undecodable input.
        raw: Vec<u8>,
    },

    /// Binary document did not start with the expected magic bytes.
    #[error("not a binary document ({} bytes)", raw.len())]
    BadMagic {
        /// The undecodable input.
        raw: Vec<u8>,
    },

    /// Unknown structure marker in a binary document.
    #[error("invalid marker 0x{marker:02x} at offset {offset}")]
    BadMarker {
        /// The unexpected marker byte.
        marker: u8,
        /// Offset of the marker.
        offset: usize,
        /// The undecodable input.
        raw: Vec<u8>,
    },

    /// A node handle did not belong to the document.
    #[error("stale node handle")]
    StaleNode,

    /// Document has no content where some was required.
    #[error("empty document")]
    Empty,
}

impl DocError {
    /// The undecodable input a binary decode failure carries.
    ///
    /// Transport saves it for diagnostics before failing the request.
    pub fn raw_input(&self) -> Option<&[u8]> {
        match self {
            DocError::Truncated { raw, .. }
            | DocError::BadMagic { raw }
            | DocError::BadMarker { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for DocError {
    fn from(e: quick_xml::Error) -> Self {
        DocError::Xml(e.to_string())
    }
}
