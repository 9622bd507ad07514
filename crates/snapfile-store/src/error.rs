//! Error types for store operations.

use std::path::PathBuf;
use std::time::Duration;

use snapfile_lock::LockError;
use thiserror::Error;

use crate::codec::CodecError;

/// Coarse failure category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The object handle cannot be read from or written into.
    InvalidObject,
    /// The lock is held elsewhere or could not be taken in time.
    LockAcquisitionFailed,
    /// The lock file path itself cannot be opened.
    LockFileOpenFailed,
    /// The persisted file exists but does not decode.
    PersistedStateCorrupt,
    /// The persisted file exists but could not be read.
    LoadFailed,
    /// The temporary sibling file could not be created.
    TempFileCreateFailed,
    /// Encoding or writing the snapshot failed.
    EncodeFailed,
    /// Renaming the snapshot over the target failed.
    CommitFailed,
    /// The background writer is no longer running.
    WorkerStopped,
    /// The writer did not shut down cleanly.
    Shutdown,
}

/// Errors that can occur while opening, saving or closing a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object handle is unusable.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Lock was not acquired before the timeout.
    #[error(
        "lock acquisition failed: {resource} not acquired within {timeout:?}{}",
        last_error_suffix(.last_error)
    )]
    LockTimeout {
        resource: String,
        timeout: Duration,
        /// Last OS error seen while retrying, if any attempt failed for a
        /// reason other than the lock being held.
        last_error: Option<String>,
    },

    /// Lock acquisition was rejected.
    #[error("lock acquisition failed: {source}")]
    Lock {
        resource: String,
        #[source]
        source: LockError,
    },

    /// Persisted state does not decode.
    #[error("corrupt persisted state in {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// Persisted state exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Temp file creation failed.
    #[error("failed to create temp file in {dir}: {source}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Encoding into the temp file failed.
    #[error("failed to encode snapshot for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: CodecError,
    },

    /// Rename onto the target failed.
    #[error("failed to commit snapshot to {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writer task is gone.
    #[error("writer stopped: {0}")]
    WorkerStopped(String),

    /// Shutdown error.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl StoreError {
    /// Returns the failure category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::InvalidObject(_) => ErrorKind::InvalidObject,
            StoreError::LockTimeout { .. } => ErrorKind::LockAcquisitionFailed,
            StoreError::Lock { source, .. } if source.is_unrecoverable() => {
                ErrorKind::LockFileOpenFailed
            }
            StoreError::Lock { .. } => ErrorKind::LockAcquisitionFailed,
            StoreError::Corrupt { .. } => ErrorKind::PersistedStateCorrupt,
            StoreError::Load { .. } => ErrorKind::LoadFailed,
            StoreError::TempFile { .. } => ErrorKind::TempFileCreateFailed,
            StoreError::Encode { .. } => ErrorKind::EncodeFailed,
            StoreError::Commit { .. } => ErrorKind::CommitFailed,
            StoreError::WorkerStopped(_) => ErrorKind::WorkerStopped,
            StoreError::Shutdown(_) => ErrorKind::Shutdown,
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

fn last_error_suffix(error: &Option<String>) -> String {
    match error {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}
