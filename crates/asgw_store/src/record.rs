//! The record model.
//!
//! A [`Record`] is one synchronizable object: a folder or an item of
//! one data class. Its payload is a generic [`Document`] tree; the
//! sideband fields the engine filters and diffs on (start time,
//! completion, recurrence) are lifted out of the payload so the store
//! never has to parse it.

use asgw_document::Document;
use serde::{Deserialize, Serialize};

use crate::handler::HandlerType;

/// Synchronization state of a record relative to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Never sent to the device; announce as an addition.
    PendingAdd,
    /// Changed since last sent; announce as a change.
    Replaced,
    /// Deleted on the server; announce as a deletion.
    Deleted,
    /// In sync; nothing to announce.
    Synced,
}

/// Whether a record is an item or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// A synchronizable item inside a collection.
    Item,
    /// A collection in the folder hierarchy.
    Folder,
}

/// What an exception does to its occurrence.
#[derive(Debug, Clone)]
pub enum ExceptionKind {
    /// The occurrence is replaced by this payload.
    Modified(Document),
    /// The occurrence is removed from the series.
    Deleted,
}

/// An override of one occurrence of a recurring series, keyed by the
/// start time the occurrence would otherwise have had.
#[derive(Debug, Clone)]
pub struct ExceptionOverride {
    /// Start time of the original occurrence, in epoch seconds.
    pub original_start: i64,
    /// What happens to that occurrence.
    pub kind: ExceptionKind,
}

/// Recurrence rule of a calendar or task series, reduced to what the
/// sync engine needs: the spacing of occurrences, the end of the
/// series, and per-occurrence overrides.
#[derive(Debug, Clone)]
pub struct Recurrence {
    /// Seconds between occurrences.
    pub interval: u32,
    /// End of the series in epoch seconds, or `None` for unbounded.
    pub until: Option<i64>,
    /// Per-occurrence overrides.
    pub exceptions: Vec<ExceptionOverride>,
}

impl Recurrence {
    /// Returns the override for the occurrence at `start`, if any.
    pub fn exception_at(&self, start: i64) -> Option<&ExceptionOverride> {
        self.exceptions.iter().find(|e| e.original_start == start)
    }

    /// Whether the series, started at `base`, still produces an
    /// occurrence at or after `cutoff`.
    ///
    /// A recurring item whose last visible occurrence has scrolled out
    /// of the filter window must stay on the device when a future
    /// occurrence will scroll back in.
    pub fn regenerates_after(&self, base: i64, cutoff: i64) -> bool {
        if self.interval == 0 {
            return base >= cutoff && self.exception_at(base).map_or(true, |e| !e.is_delete());
        }
        let last = match self.until {
            None => return true,
            Some(until) if until < base => base,
            Some(until) => {
                let span = (until - base) as u64;
                base + (span - span % u64::from(self.interval)) as i64
            }
        };
        if last < cutoff {
            return false;
        }
        // Walk only the occurrences inside [cutoff, last]; exceptions
        // can delete every one of them.
        let step = i64::from(self.interval);
        let mut start = base;
        if cutoff > base {
            let skipped = (cutoff - base) as u64;
            let steps = skipped.div_ceil(self.interval as u64);
            start = base + steps as i64 * step;
        }
        while start <= last {
            match self.exception_at(start) {
                Some(e) if e.is_delete() => start += step,
                _ => return true,
            }
        }
        false
    }
}

impl ExceptionOverride {
    fn is_delete(&self) -> bool {
        matches!(self.kind, ExceptionKind::Deleted)
    }
}

/// One synchronizable object.
#[derive(Debug, Clone)]
pub struct Record {
    /// Server id, prefixed with the handler letter.
    pub id: String,
    /// Collection id this record lives in; folders name their parent.
    pub group: String,
    /// Data class owning the record.
    pub handler: HandlerType,
    /// Item or folder.
    pub kind: RecordKind,
    /// Synchronization state relative to the requesting device.
    pub sync: SyncStatus,
    /// The payload as sent to and received from the device.
    pub body: Document,
    /// Last server-side modification, epoch seconds.
    pub modified: i64,
    /// Event start time (calendar) or due date (tasks), epoch seconds.
    pub start_time: Option<i64>,
    /// Whether a task is complete.
    pub completed: bool,
    /// Recurrence rule, when the record is a recurring series.
    pub recurrence: Option<Recurrence>,
}

impl Record {
    /// Creates an item record with an empty sideband.
    pub fn item(id: &str, group: &str, handler: HandlerType, body: Document) -> Record {
        Record {
            id: id.to_owned(),
            group: group.to_owned(),
            handler,
            kind: RecordKind::Item,
            sync: SyncStatus::PendingAdd,
            body,
            modified: 0,
            start_time: None,
            completed: false,
            recurrence: None,
        }
    }

    /// Creates a folder record. Its id doubles as a collection id.
    pub fn folder(id: &str, parent: &str, handler: HandlerType, body: Document) -> Record {
        Record {
            kind: RecordKind::Folder,
            ..Record::item(id, parent, handler, body)
        }
    }

    /// Whether the record survives a time filter with the given
    /// cutoff. Records without a start time always survive.
    pub fn within_window(&self, cutoff: i64) -> bool {
        match self.start_time {
            None => true,
            Some(start) if start >= cutoff => true,
            Some(start) => self
                .recurrence
                .as_ref()
                .is_some_and(|r| r.regenerates_after(start, cutoff)),
        }
    }
}
