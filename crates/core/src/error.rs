//! Error types for overlaydb
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Store failures and administrative failures are kept apart: the former
//! propagate out of single read/write calls (after cleanup has run), the latter
//! abort the push workflow at whatever state it had reached.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for overlaydb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for overlaydb
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (metadata records, lock files, config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failure reported by the overlay or original store
    #[error("Store error: {0}")]
    Store(String),

    /// The row lock retry budget was exhausted
    #[error("Could not acquire row lock for row {row} after {attempts} attempts")]
    RowLockTimeout {
        /// Printable form of the contended row key
        row: String,
        /// Number of compare-and-swap attempts made
        attempts: u32,
    },

    /// Administrative call failed (table, family, replication or snapshot)
    #[error("Admin error: {0}")]
    Admin(String),

    /// Write attempted on an overlay that is being pushed or was pushed
    #[error("Overlay {overlay} cannot be mutated in state {state}")]
    OverlayDisabled {
        /// Overlay table name
        overlay: String,
        /// Lifecycle state recorded in the overlay metadata
        state: String,
    },

    /// Another push holds the advisory lock file
    #[error("Push lock could not be acquired: {0}")]
    PushLockHeld(String),

    /// Replication backlog did not reach zero in time
    #[error("Replication did not drain within {0:?}")]
    DrainTimeout(Duration),

    /// Operation not valid for the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request shape
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be read or is out of range
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a store error from any displayable message
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// Build an admin error from any displayable message
    pub fn admin(msg: impl Into<String>) -> Self {
        Error::Admin(msg.into())
    }

    /// True for failures reported by a store call
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Store(_))
    }

    /// True when the caller may retry the whole operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RowLockTimeout { .. } | Error::PushLockHeld(_))
    }
}
