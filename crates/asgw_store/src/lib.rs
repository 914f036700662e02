//! # asgw store
//!
//! Store collaborators for the gateway: the data class handlers, the
//! record model with its sync state and recurrence sideband, the
//! [`DataStore`] abstraction over user data, and per-device session
//! state ([`DeviceState`]).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod device;
mod error;
pub mod handler;
pub mod record;
pub mod store;

pub use device::{BodyPref, DeviceSessions, DeviceState, SearchHit};
pub use error::{StoreError, StoreResult};
pub use handler::HandlerType;
pub use record::{ExceptionKind, ExceptionOverride, Record, RecordKind, Recurrence, SyncStatus};
pub use store::{Attachment, Authorization, DataStore, MemoryStore};
