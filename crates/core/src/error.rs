//! Error types for sqlpack archives
//!
//! This module defines the error taxonomy used throughout the workspace.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Not every failure is an error: "entry not found" and precondition
//! violations are reported as `Ok(false)` or empty results by the archive
//! handle. Errors are reserved for backend faults, host I/O faults and
//! internal invariant breaches.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for sqlpack operations
pub type PackResult<T> = std::result::Result<T, PackError>;

/// Mandatory post-open setup step of an archive connection
///
/// A failure in any of these leaves a handle that claims to be open in an
/// unusable state, so `open`/`create` surface it as an error instead of `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// Applying the encryption key
    Key,
    /// Switching to write-ahead journaling
    JournalMode,
    /// Creating the entries table and its unique index
    Schema,
    /// Enabling defensive mode
    Defensive,
    /// Registering the regular-expression predicate
    RegexpPredicate,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupStep::Key => "set key",
            SetupStep::JournalMode => "set journaling mode",
            SetupStep::Schema => "create table or index",
            SetupStep::Defensive => "set defensive mode",
            SetupStep::RegexpPredicate => "register regexp function",
        };
        f.write_str(name)
    }
}

/// Error types for sqlpack
#[derive(Debug, Error)]
pub enum PackError {
    /// Backend fault: malformed statement, constraint violation, I/O fault
    /// inside the storage engine. Carries the backend's diagnostic text.
    #[error("Backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// Host file-system fault outside the backend
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A mandatory post-open setup step failed
    #[error("Could not {step}: {source}")]
    Setup {
        /// Which step failed
        step: SetupStep,
        /// Underlying backend error
        #[source]
        source: rusqlite::Error,
    },

    /// Entry does not exist (constructor-like operations only)
    #[error("Entry {0} does not exist")]
    NotFound(String),

    /// Entry already exists and replacement was not allowed
    #[error("Entry {0} already exists")]
    AlreadyExists(String),

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation requires an open archive
    #[error("Archive is not open")]
    NotOpen,

    /// Archive is memory- or temporary-backed and cannot be reopened by path
    #[error("Archive has no canonical path")]
    NoCanonicalPath,

    /// Snapshot could not be opened read-only against the origin's path
    #[error("Could not open immutable snapshot: {0}")]
    SnapshotOpen(String),

    /// A key was supplied but the backend was built without encryption
    #[error("Encryption is not available in this build")]
    EncryptionUnavailable,

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal invariant breach; signals a defect, not an environmental condition
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

impl PackError {
    /// Create an invalid-input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PackError::InvalidInput(msg.into())
    }

    /// Create an internal invariant error
    pub fn invariant(msg: impl Into<String>) -> Self {
        PackError::Invariant(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        PackError::Config(msg.into())
    }

    /// Create a not-found error for the named entry
    pub fn not_found(name: impl Into<String>) -> Self {
        PackError::NotFound(name.into())
    }

    /// Wrap a backend error raised by a setup step
    pub fn setup(step: SetupStep, source: rusqlite::Error) -> Self {
        PackError::Setup { step, source }
    }

    /// Whether this is the backend's lock-contention signal
    pub fn is_busy(&self) -> bool {
        match self {
            PackError::Backend(e) => is_busy(e),
            _ => false,
        }
    }

    /// Whether this error is a backend fault (as opposed to a defect or host I/O)
    pub fn is_backend(&self) -> bool {
        matches!(self, PackError::Backend(_) | PackError::Setup { .. })
    }
}

/// Whether a backend error is `SQLITE_BUSY` (any extended code)
pub fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy,
                ..
            },
            _
        )
    )
}
