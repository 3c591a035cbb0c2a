//! Error taxonomy for the signup core.
//!
//! Domain failures ([`SignupError`]) are synchronous and never retried. I/O
//! failures against the platform ([`PlatformError`]) and the persistence
//! backend ([`StorageError`]) are reported to the runtime, which logs them and
//! skips only the affected unit of work.

use crate::ids::{RecordId, UserId};
use thiserror::Error;

/// Broad classification of a [`SignupError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad selector, out-of-range position, ambiguous label, invalid record
    Validation,
    /// Record, slot or user absent
    NotFound,
    /// Already assigned/waitlisted, slot full, record closed
    Conflict,
}

/// Errors produced by the assignment engine and the lifecycle reducer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignupError {
    /// A free-text label matched more than one slot.
    #[error("Selector '{selector}' is ambiguous: matches {matches:?}")]
    AmbiguousSelector {
        /// The label as given
        selector: String,
        /// Names of every slot that partially matched
        matches: Vec<String>,
    },

    /// No slot matched the selector.
    #[error("No slot matches '{selector}'")]
    SlotNotFound {
        /// The selector as given
        selector: String,
    },

    /// A 1-based position outside `1..=len`.
    #[error("Position {position} is out of range (1..={len})")]
    PositionOutOfRange {
        /// The position as given
        position: usize,
        /// Number of selectable slots
        len: usize,
    },

    /// The user already occupies the destination roster.
    #[error("User {user} is already assigned to '{slot}'")]
    AlreadyAssigned {
        /// The user
        user: UserId,
        /// Destination slot name
        slot: String,
    },

    /// The user is already queued on the destination waitlist.
    #[error("User {user} is already waitlisted for '{slot}'")]
    AlreadyWaitlisted {
        /// The user
        user: UserId,
        /// Slot name
        slot: String,
    },

    /// The user is not on the slot's roster.
    #[error("User {user} is not signed up for '{slot}'")]
    NotSignedUp {
        /// The user
        user: UserId,
        /// Slot name
        slot: String,
    },

    /// The destination (or the record-wide ceiling) has no room.
    #[error("'{slot}' is full ({capacity} max)")]
    SlotFull {
        /// Slot name
        slot: String,
        /// Capacity that was hit
        capacity: u32,
    },

    /// Normal mutations are rejected while a record is closed.
    #[error("Record {0} is closed")]
    RecordClosed(RecordId),

    /// Close requested on an already closed record.
    #[error("Record {0} is already closed")]
    AlreadyClosed(RecordId),

    /// Reopen requested on an open record.
    #[error("Record {0} is already open")]
    AlreadyOpen(RecordId),

    /// The record does not exist (or was deleted).
    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    /// A record failed structural validation on creation.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl SignupError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AmbiguousSelector { .. }
            | Self::PositionOutOfRange { .. }
            | Self::InvalidRecord(_) => ErrorKind::Validation,
            Self::SlotNotFound { .. } | Self::NotSignedUp { .. } | Self::RecordNotFound(_) => {
                ErrorKind::NotFound
            },
            Self::AlreadyAssigned { .. }
            | Self::AlreadyWaitlisted { .. }
            | Self::SlotFull { .. }
            | Self::RecordClosed(_)
            | Self::AlreadyClosed(_)
            | Self::AlreadyOpen(_) => ErrorKind::Conflict,
        }
    }

    /// Stable machine-readable code, suitable for the command surface.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AmbiguousSelector { .. } => "AMBIGUOUS_SELECTOR",
            Self::SlotNotFound { .. } => "SLOT_NOT_FOUND",
            Self::PositionOutOfRange { .. } => "POSITION_OUT_OF_RANGE",
            Self::AlreadyAssigned { .. } => "ALREADY_ASSIGNED",
            Self::AlreadyWaitlisted { .. } => "ALREADY_WAITLISTED",
            Self::NotSignedUp { .. } => "NOT_SIGNED_UP",
            Self::SlotFull { .. } => "SLOT_FULL",
            Self::RecordClosed(_) => "RECORD_CLOSED",
            Self::AlreadyClosed(_) => "ALREADY_CLOSED",
            Self::AlreadyOpen(_) => "ALREADY_OPEN",
            Self::RecordNotFound(_) => "RECORD_NOT_FOUND",
            Self::InvalidRecord(_) => "INVALID_RECORD",
        }
    }
}

/// Errors from the durable persistence backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database or filesystem failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Transient errors talking to the chat platform (membership fetches,
/// render edits, reaction changes, history scans).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// The platform rejected or failed the call.
    #[error("Platform request failed: {0}")]
    Request(String),

    /// The platform asked us to slow down.
    #[error("Rate limited; retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested back-off in milliseconds
        retry_after_ms: u64,
    },
}

/// Errors parsing a rendered post back into a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// The post carries no marker line.
    #[error("Post has no rollcall marker")]
    MissingMarker,

    /// The marker uses a format version we cannot read.
    #[error("Unsupported marker version '{0}'")]
    UnsupportedVersion(String),

    /// The marker names an unknown record kind.
    #[error("Unknown record kind '{0}'")]
    UnknownKind(String),

    /// A line could not be parsed.
    #[error("Malformed line {line}: {reason}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The parsed record violates its shape or roster invariants.
    #[error("Recovered record is invalid: {0}")]
    Invalid(String),
}
