//! Server error types and their HTTP mapping.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Failures that abort a request before or during dispatch.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The query string could not be decoded.
    #[error(transparent)]
    Protocol(#[from] asgw_protocol::ProtocolError),

    /// The body could not be decoded or encoded.
    #[error(transparent)]
    Document(#[from] asgw_document::DocError),

    /// The engine failed in a non-reportable way.
    #[error(transparent)]
    Engine(#[from] asgw_engine::EngineError),

    /// A store operation failed outside the engine.
    #[error(transparent)]
    Store(#[from] asgw_store::StoreError),

    /// The request names no command.
    #[error("no command in request")]
    MissingCommand,

    /// The command is known to the protocol but not served here.
    #[error("unsupported command {0:?}")]
    Unsupported(String),
}

impl ServerError {
    /// Maps the failure to its HTTP status code.
    ///
    /// Undecodable or unsupported bodies are 501, everything else a
    /// malformed request (400).
    pub fn http_status(&self) -> u16 {
        match self {
            ServerError::Document(_) | ServerError::Unsupported(_) => 501,
            _ => 400,
        }
    }
}
