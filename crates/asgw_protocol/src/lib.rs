//! # asgw protocol
//!
//! Wire-level ActiveSync protocol types: the command and parameter
//! code tables, binary query string decoding ([MS-ASHTTP]
//! 2.2.1.1.1.1), multipart response framing, per-command-family status
//! tables, and the client-value conversion tables for filters and
//! truncation sizes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod command;
mod error;
pub mod multipart;
pub mod query;
pub mod status;
pub mod tables;

pub use error::{ProtocolError, ProtocolResult};
pub use query::DecodedQuery;
pub use status::{GlobalCode, ItemOpCode, OofState, SettingsCode, SyncCode};
pub use tables::FilterWindow;
