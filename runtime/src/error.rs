//! Error types for the runtime.
//!
//! Domain rejections pass through unchanged as [`ServiceError::Signup`] so the
//! command surface can report their stable codes. Persistence failures never
//! surface here: the store logs them and keeps serving from memory.

use rollcall_core::error::{ErrorKind, PlatformError, SignupError, StorageError};
use rollcall_core::ids::RecordId;
use thiserror::Error;

/// Errors returned by the command surface ([`crate::service::SignupService`]).
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The command was rejected by the assignment engine or lifecycle rules
    #[error(transparent)]
    Signup(#[from] SignupError),

    /// A record with this id is already stored
    #[error("Record {0} already exists")]
    Duplicate(RecordId),
}

impl ServiceError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Signup(error) => error.code(),
            Self::Duplicate(_) => "DUPLICATE_RECORD",
        }
    }

    /// Taxonomy bucket of the failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Signup(error) => error.kind(),
            Self::Duplicate(_) => ErrorKind::Conflict,
        }
    }
}

/// Why a single record could not be reconciled.
///
/// These never abort a pass; the reconciler logs them and moves on.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The record disappeared from the store before its turn
    #[error(transparent)]
    Signup(#[from] SignupError),

    /// Could not tell whether the hosting post still exists
    #[error("Post lookup failed: {0}")]
    Platform(#[from] PlatformError),
}

/// Errors from bootstrapping the engine.
#[derive(Error, Debug)]
pub enum StartupError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The persistence backend could not be read at startup
    #[error("Failed to load records: {0}")]
    Storage(#[from] StorageError),

    /// Metrics exporter could not be installed
    #[error(transparent)]
    Metrics(#[from] crate::metrics::MetricsError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is set but does not parse
    #[error("Invalid value for {name}: '{value}'")]
    Invalid {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
    },

    /// The `.env` file could not be read
    #[error("Failed to read env file: {0}")]
    EnvFile(String),
}

impl From<dotenvy::Error> for ConfigError {
    fn from(error: dotenvy::Error) -> Self {
        Self::EnvFile(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signup_codes_pass_through() {
        let error = ServiceError::from(SignupError::RecordClosed(RecordId::new("r1")));
        assert_eq!(error.code(), "RECORD_CLOSED");
        assert_eq!(error.kind(), ErrorKind::Conflict);
        assert_eq!(error.to_string(), "Record r1 is closed");
    }

    #[test]
    fn duplicate_is_a_conflict() {
        let error = ServiceError::Duplicate(RecordId::new("r1"));
        assert_eq!(error.code(), "DUPLICATE_RECORD");
        assert_eq!(error.kind(), ErrorKind::Conflict);
    }
}
