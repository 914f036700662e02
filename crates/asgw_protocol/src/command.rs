//! Command and parameter code tables.
//!
//! Codes follow [MS-ASHTTP] 2.2.1.1.1.1.2; names are the plain-query
//! spellings the rest of the server works with.

/// ActiveSync server protocol version advertised to clients.
pub const SERVER_VERSION: &str = "16.1";

/// Protocol versions the server accepts.
pub const SUPPORTED_VERSIONS: &str = "2.5,12.0,12.1,14.0,14.1,16.0,16.1";

/// Command-code table, indexed by the binary query command byte.
const COMMANDS: &[(u8, &str)] = &[
    (0, "Sync"),
    (1, "SendMail"),
    (2, "SmartForward"),
    (3, "SmartReply"),
    (4, "GetAttachment"),
    (9, "FolderSync"),
    (10, "FolderCreate"),
    (11, "FolderDelete"),
    (12, "FolderUpdate"),
    (13, "MoveItems"),
    (14, "GetItemEstimate"),
    (15, "MeetingResponse"),
    (16, "Search"),
    (17, "Settings"),
    (18, "Ping"),
    (19, "ItemOperations"),
    (20, "Provision"),
    (21, "ResolveRecipients"),
    (22, "ValidateCert"),
];

/// Command-parameter tag table for the trailing (tag, length, value)
/// triples of a binary query.
const PARAMETERS: &[(u8, &str)] = &[
    (0, "AttachmentName"),
    (1, "CollectionId"),
    (3, "ItemId"),
    (4, "LongId"),
    (5, "ParentId"),
    (6, "Occurrence"),
    (7, "Options"),
    (8, "User"),
];

/// Named flags carried in the one-byte sub-code of an `Options`
/// parameter.
const OPTION_FLAGS: &[(u8, &str)] = &[(1, "SaveInSent"), (2, "AcceptMultiPart")];

/// Resolves a command code to its name.
pub fn command_name(code: u8) -> Option<&'static str> {
    COMMANDS.iter().find(|(c, _)| *c == code).map(|(_, n)| *n)
}

/// Resolves a command name to its code.
pub fn command_code(name: &str) -> Option<u8> {
    COMMANDS.iter().find(|(_, n)| *n == name).map(|(c, _)| *c)
}

/// Resolves a parameter tag byte to its name.
pub fn parameter_name(tag: u8) -> Option<&'static str> {
    PARAMETERS.iter().find(|(c, _)| *c == tag).map(|(_, n)| *n)
}

/// Resolves a parameter name to its tag byte.
pub fn parameter_tag(name: &str) -> Option<u8> {
    PARAMETERS.iter().find(|(_, n)| *n == name).map(|(c, _)| *c)
}

/// Resolves an `Options` sub-code to its flag name.
pub fn option_flag_name(code: u8) -> Option<&'static str> {
    OPTION_FLAGS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, n)| *n)
}

/// Resolves an `Options` flag name to its sub-code.
pub fn option_flag_code(name: &str) -> Option<u8> {
    OPTION_FLAGS
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(c, _)| *c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lookup_both_ways() {
        assert_eq!(command_name(0), Some("Sync"));
        assert_eq!(command_name(19), Some("ItemOperations"));
        assert_eq!(command_code("Ping"), Some(18));
        assert_eq!(command_name(99), None);
        assert_eq!(command_code("NoSuchCommand"), None);
    }

    #[test]
    fn parameter_lookup() {
        assert_eq!(parameter_name(7), Some("Options"));
        assert_eq!(parameter_tag("User"), Some(8));
        assert_eq!(parameter_name(42), None);
    }

    #[test]
    fn option_flags() {
        assert_eq!(option_flag_name(2), Some("AcceptMultiPart"));
        assert_eq!(option_flag_code("SaveInSent"), Some(1));
        assert_eq!(option_flag_name(0), None);
    }
}
