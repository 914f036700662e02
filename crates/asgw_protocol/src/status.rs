//! Per-command-family status code tables.
//!
//! ActiveSync reports errors through small integers whose meaning is
//! scoped to the command family. Each table carries the human-readable
//! description used for diagnostics.

/// Status codes for the `Sync` command family ([MS-ASCMD] 2.2.3.177.16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCode {
    /// Success.
    Ok,
    /// Invalid or mismatched synchronization key.
    SyncKey,
    /// Semantic error in the synchronization request.
    Protocol,
    /// Server misconfiguration, temporary system issue, or bad item.
    Server,
    /// Error in client/server conversion.
    Conversion,
    /// Conflict matching the client and server object.
    Conflict,
    /// Object not found.
    NotFound,
    /// The Sync command cannot be completed.
    Incomplete,
    /// The folder hierarchy has changed.
    FolderChange,
    /// The Sync command request is not complete.
    PartialRequest,
    /// Invalid Wait or HeartbeatInterval value.
    WaitRange,
    /// Too many collections are included in the Sync request.
    TooManyCollections,
    /// Something on the server caused a retriable error.
    Retry,
}

impl SyncCode {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            SyncCode::Ok => 1,
            SyncCode::SyncKey => 3,
            SyncCode::Protocol => 4,
            SyncCode::Server => 5,
            SyncCode::Conversion => 6,
            SyncCode::Conflict => 7,
            SyncCode::NotFound => 8,
            SyncCode::Incomplete => 9,
            SyncCode::FolderChange => 12,
            SyncCode::PartialRequest => 13,
            SyncCode::WaitRange => 14,
            SyncCode::TooManyCollections => 15,
            SyncCode::Retry => 16,
        }
    }

    /// Returns the diagnostic description.
    pub fn describe(self) -> &'static str {
        match self {
            SyncCode::Ok => "Success",
            SyncCode::SyncKey => {
                "Invalid or mismatched synchronization key, or synchronization state \
                 corrupted on server"
            }
            SyncCode::Protocol => "Protocol error: semantic error in the synchronization request",
            SyncCode::Server => "Server error: misconfiguration, temporary issue, or bad item",
            SyncCode::Conversion => "Error in client/server conversion",
            SyncCode::Conflict => "Conflict matching the client and server object",
            SyncCode::NotFound => "Object not found",
            SyncCode::Incomplete => "The Sync command cannot be completed",
            SyncCode::FolderChange => "The folder hierarchy has changed",
            SyncCode::PartialRequest => "The Sync command request is not complete",
            SyncCode::WaitRange => "Invalid Wait or HeartbeatInterval value",
            SyncCode::TooManyCollections => {
                "Invalid Sync command request: too many collections included"
            }
            SyncCode::Retry => "Retry: something on the server caused a retriable error",
        }
    }
}

/// Status codes for the `ItemOperations` family ([MS-ASCMD] 2.2.3.177.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOpCode {
    /// Success.
    Ok,
    /// Protocol violation or XML validation error.
    Protocol,
    /// Server error.
    Server,
    /// Document library: the specified URI is bad.
    BadUri,
    /// Document library: access denied.
    AccessDenied,
    /// The object was not found or access denied.
    NotFound,
    /// Document library: failed to connect to the server.
    Connect,
    /// The byte range is invalid or too large.
    ByteRange,
    /// The store is unknown or unsupported.
    UnknownStore,
    /// The file is empty.
    EmptyFile,
    /// The requested data size is too large.
    TooLarge,
    /// Failed to download the file because of an I/O failure.
    Io,
    /// Mailbox fetch provider: the item failed conversion.
    Conversion,
    /// Attachment or attachment ID is invalid.
    BadAttachment,
    /// Access to the resource is denied.
    ResourceDenied,
    /// Partial success; the command completed partially.
    Partial,
    /// Credentials required.
    Credentials,
}

impl ItemOpCode {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            ItemOpCode::Ok => 1,
            ItemOpCode::Protocol => 2,
            ItemOpCode::Server => 3,
            ItemOpCode::BadUri => 4,
            ItemOpCode::AccessDenied => 5,
            ItemOpCode::NotFound => 6,
            ItemOpCode::Connect => 7,
            ItemOpCode::ByteRange => 8,
            ItemOpCode::UnknownStore => 9,
            ItemOpCode::EmptyFile => 10,
            ItemOpCode::TooLarge => 11,
            ItemOpCode::Io => 12,
            ItemOpCode::Conversion => 14,
            ItemOpCode::BadAttachment => 15,
            ItemOpCode::ResourceDenied => 16,
            ItemOpCode::Partial => 17,
            ItemOpCode::Credentials => 18,
        }
    }

    /// Returns the diagnostic description.
    pub fn describe(self) -> &'static str {
        match self {
            ItemOpCode::Ok => "Success",
            ItemOpCode::Protocol => "Protocol error: protocol violation or XML validation error",
            ItemOpCode::Server => "Server error",
            ItemOpCode::BadUri => "Document library access: the specified URI is bad",
            ItemOpCode::AccessDenied => "Document library: access denied",
            ItemOpCode::NotFound => "The object was not found or access denied",
            ItemOpCode::Connect => "Document library: failed to connect to the server",
            ItemOpCode::ByteRange => "The byte range is invalid or too large",
            ItemOpCode::UnknownStore => "The store is unknown or unsupported",
            ItemOpCode::EmptyFile => "The file is empty",
            ItemOpCode::TooLarge => "The requested data size is too large",
            ItemOpCode::Io => "Failed to download file because of an input/output failure",
            ItemOpCode::Conversion => "Mailbox fetch provider: the item failed conversion",
            ItemOpCode::BadAttachment => "Attachment or attachment ID is invalid",
            ItemOpCode::ResourceDenied => "Access to the resource is denied",
            ItemOpCode::Partial => "Partial success; the command completed partially",
            ItemOpCode::Credentials => "Credentials required",
        }
    }
}

/// Status codes for the `Settings` family ([MS-ASCMD] 2.2.3.177.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsCode {
    /// Success.
    Ok,
    /// Protocol error.
    Protocol,
    /// Access denied.
    AccessDenied,
    /// Server unavailable.
    Unavailable,
    /// Invalid arguments.
    InvalidArgs,
    /// Conflicting arguments.
    ConflictingArgs,
    /// Denied by policy.
    PolicyDenied,
}

impl SettingsCode {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            SettingsCode::Ok => 1,
            SettingsCode::Protocol => 2,
            SettingsCode::AccessDenied => 3,
            SettingsCode::Unavailable => 4,
            SettingsCode::InvalidArgs => 5,
            SettingsCode::ConflictingArgs => 6,
            SettingsCode::PolicyDenied => 7,
        }
    }

    /// Returns the diagnostic description.
    pub fn describe(self) -> &'static str {
        match self {
            SettingsCode::Ok => "Success",
            SettingsCode::Protocol => "Protocol error",
            SettingsCode::AccessDenied => "Access denied",
            SettingsCode::Unavailable => "Server unavailable",
            SettingsCode::InvalidArgs => "Invalid arguments",
            SettingsCode::ConflictingArgs => "Conflicting arguments",
            SettingsCode::PolicyDenied => "Denied by policy",
        }
    }
}

/// Out-of-office state sub-table for `Settings` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OofState {
    /// Oof is disabled.
    Disabled,
    /// Oof is global.
    Global,
    /// Oof is time-based.
    TimeBased,
}

impl OofState {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            OofState::Disabled => 0,
            OofState::Global => 1,
            OofState::TimeBased => 2,
        }
    }

    /// Returns the diagnostic description.
    pub fn describe(self) -> &'static str {
        match self {
            OofState::Disabled => "Oof is disabled",
            OofState::Global => "Oof is global",
            OofState::TimeBased => "Oof is time-based",
        }
    }
}

/// Command-independent status codes ([MS-ASCMD] 2.2.4), used where a
/// failure is not specific to one family (e.g. mail submission).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalCode {
    /// Server error.
    ServerError,
    /// The mail could not be submitted for delivery.
    MailSubmission,
    /// The user is not allowed to sync.
    SyncDisabled,
}

impl GlobalCode {
    /// Returns the wire code.
    pub fn code(self) -> u8 {
        match self {
            GlobalCode::ServerError => 110,
            GlobalCode::MailSubmission => 120,
            GlobalCode::SyncDisabled => 126,
        }
    }

    /// Returns the diagnostic description.
    pub fn describe(self) -> &'static str {
        match self {
            GlobalCode::ServerError => "Server error",
            GlobalCode::MailSubmission => "Mail submission failed",
            GlobalCode::SyncDisabled => "User is disabled for synchronization",
        }
    }
}
