//! Data class handlers.
//!
//! Every collection id starts with a one-letter prefix that names the
//! data class it belongs to, so routing a request to the right handler
//! never needs a lookup table on the server side.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The data classes a device can synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerType {
    /// Email messages and mail folders.
    Mail,
    /// Calendar events.
    Calendar,
    /// Contacts.
    Contact,
    /// Tasks.
    Task,
    /// Notes.
    Note,
    /// Document library items.
    DocLib,
}

impl HandlerType {
    /// All handlers, in dispatch order.
    pub const ALL: [HandlerType; 6] = [
        HandlerType::Mail,
        HandlerType::Calendar,
        HandlerType::Contact,
        HandlerType::Task,
        HandlerType::Note,
        HandlerType::DocLib,
    ];

    /// The one-letter prefix carried by collection and item ids.
    pub fn prefix(self) -> char {
        match self {
            HandlerType::Mail => 'M',
            HandlerType::Calendar => 'C',
            HandlerType::Contact => 'A',
            HandlerType::Task => 'T',
            HandlerType::Note => 'N',
            HandlerType::DocLib => 'D',
        }
    }

    /// The ActiveSync class name for this handler.
    pub fn class_name(self) -> &'static str {
        match self {
            HandlerType::Mail => "Email",
            HandlerType::Calendar => "Calendar",
            HandlerType::Contact => "Contacts",
            HandlerType::Task => "Tasks",
            HandlerType::Note => "Notes",
            HandlerType::DocLib => "DocumentLibrary",
        }
    }

    /// Resolves a prefix character back to its handler.
    pub fn from_prefix(ch: char) -> Option<HandlerType> {
        Some(match ch {
            'M' => HandlerType::Mail,
            'C' => HandlerType::Calendar,
            'A' => HandlerType::Contact,
            'T' => HandlerType::Task,
            'N' => HandlerType::Note,
            'D' => HandlerType::DocLib,
            _ => return None,
        })
    }

    /// Resolves the handler responsible for a collection or item id.
    pub fn for_id(id: &str) -> StoreResult<HandlerType> {
        id.chars()
            .next()
            .and_then(HandlerType::from_prefix)
            .ok_or_else(|| StoreError::UnknownHandler(id.to_owned()))
    }

    /// Resolves an ActiveSync class name, as sent in `Search` and
    /// `Ping` requests.
    pub fn from_class(name: &str) -> Option<HandlerType> {
        HandlerType::ALL
            .into_iter()
            .find(|h| h.class_name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_round_trip() {
        for h in HandlerType::ALL {
            assert_eq!(HandlerType::from_prefix(h.prefix()), Some(h));
        }
        assert_eq!(HandlerType::from_prefix('X'), None);
    }

    #[test]
    fn id_resolution() {
        assert_eq!(HandlerType::for_id("M17").unwrap(), HandlerType::Mail);
        assert_eq!(HandlerType::for_id("C3").unwrap(), HandlerType::Calendar);
        assert!(HandlerType::for_id("Z9").is_err());
        assert!(HandlerType::for_id("").is_err());
    }

    #[test]
    fn class_names() {
        assert_eq!(HandlerType::from_class("Tasks"), Some(HandlerType::Task));
        assert_eq!(HandlerType::from_class("Mail"), None);
    }
}
