//! Request-scoped session state.

use std::collections::HashSet;
use std::sync::Arc;

use asgw_store::{DeviceState, HandlerType};

/// State scoped to one request.
///
/// The lock set marks records mutated by client commands so the diff
/// pass does not re-emit them as server changes. The part counter
/// numbers multipart parts across repeated fetches in one request.
pub struct Session {
    /// Shared state of the device issuing the request.
    pub device: Arc<DeviceState>,
    /// Whether the client accepts a multipart response.
    pub multipart: bool,
    locks: HashSet<(HandlerType, String)>,
    next_part: u32,
}

impl Session {
    /// Creates a session for one request from `device`.
    pub fn new(device: Arc<DeviceState>) -> Session {
        Session {
            device,
            multipart: false,
            locks: HashSet::new(),
            next_part: 1,
        }
    }

    /// Marks a record as mutated by this request.
    pub fn lock(&mut self, handler: HandlerType, id: &str) {
        self.locks.insert((handler, id.to_owned()));
    }

    /// Whether a record was mutated by this request.
    pub fn is_locked(&self, handler: HandlerType, id: &str) -> bool {
        self.locks.contains(&(handler, id.to_owned()))
    }

    /// Hands out the next multipart part number. Part 0 is the
    /// primary document, so numbering starts at 1.
    pub fn next_part(&mut self) -> u32 {
        let n = self.next_part;
        self.next_part += 1;
        n
    }
}
