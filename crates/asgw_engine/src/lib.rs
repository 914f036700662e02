//! # asgw engine
//!
//! The protocol engine behind the gateway: the per-collection options
//! model, the `Sync` state machine with its heartbeat long-poll, and
//! the `ItemOperations` byte-range fetch path. Request-scoped state
//! (the lock set and the multipart part counter) lives in [`Session`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod fetch;
pub mod options;
pub mod session;
pub mod sync;

pub use error::{EngineError, EngineResult};
pub use fetch::ItemFetch;
pub use options::{OptionSet, OptionsModel};
pub use session::Session;
pub use sync::{Sleeper, SyncConfig, SyncEngine, SyncOutcome, ThreadSleeper};
