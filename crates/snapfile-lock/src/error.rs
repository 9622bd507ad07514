//! Error types for lock operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while acquiring a lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// Another owner currently holds the lock.
    #[error("{resource} is held by another owner{}", holder_suffix(.holder))]
    Held {
        resource: String,
        /// Process ID recorded by the current holder, when known.
        holder: Option<u32>,
    },

    /// Acquisition was cancelled before the lock could be taken.
    #[error(
        "acquisition of {resource} cancelled after {attempts} attempt(s){}",
        last_error_suffix(.last_error)
    )]
    Cancelled {
        resource: String,
        attempts: u32,
        /// The OS error from the most recent failed attempt.
        last_error: Option<std::io::Error>,
    },

    /// The lock file itself could not be opened.
    ///
    /// This is a configuration problem (the path is a directory, its parent
    /// is missing, permissions), not contention, and retrying will not help.
    #[error("failed to open lock file {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other OS error while taking the lock.
    #[error("failed to lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    /// Returns true if retrying the acquisition cannot succeed.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, LockError::OpenFailed { .. })
    }
}

fn holder_suffix(holder: &Option<u32>) -> String {
    match holder {
        Some(pid) => format!(" (pid {})", pid),
        None => String::new(),
    }
}

fn last_error_suffix(error: &Option<std::io::Error>) -> String {
    match error {
        Some(e) => format!(" (last bind error: {})", e),
        None => String::new(),
    }
}

/// Result type alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
