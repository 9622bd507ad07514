//! Advisory file lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{LockError, Result};

/// Claims an OS advisory lock (`flock` / `LockFileEx`) on a path.
///
/// Acquisition never blocks: if another owner holds the lock the call fails
/// with [`LockError::Held`] immediately. The holder writes its process ID into
/// the file so contenders can report who owns it.
///
/// The lock file is left on disk after release. Deleting it would let a new
/// owner lock a fresh inode while an old owner still holds the unlinked one.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
}

impl FileLock {
    /// Creates an unheld lock on `path`. Nothing is touched until acquire.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this instance currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Human readable identifier for logs and errors.
    pub fn resource(&self) -> String {
        resource_name(&self.path)
    }

    /// Takes the lock without waiting.
    ///
    /// # Errors
    /// - [`LockError::OpenFailed`] if the path cannot be opened at all
    /// - [`LockError::Held`] if another owner holds it
    /// - [`LockError::Io`] for any other locking failure
    pub fn try_acquire(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let file = lock_path(&self.path)?;
        debug!(path = %self.path.display(), "file lock acquired");
        self.file = Some(file);
        Ok(())
    }

    /// [`try_acquire`](Self::try_acquire) on the blocking thread pool, for
    /// callers on an async runtime.
    pub async fn acquire(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let path = self.path.clone();
        let file = tokio::task::spawn_blocking(move || lock_path(&path))
            .await
            .map_err(|e| LockError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(format!("lock task failed: {}", e)),
            })??;

        debug!(path = %self.path.display(), "file lock acquired");
        self.file = Some(file);
        Ok(())
    }

    /// Drops the advisory lock. Releasing an unheld lock does nothing.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                // Closing the handle below releases the lock regardless.
                warn!(path = %self.path.display(), error = %e, "failed to unlock file");
            }
            debug!(path = %self.path.display(), "file lock released");
        }
    }
}

/// Opens `path` and takes an exclusive lock on it without waiting.
fn lock_path(path: &Path) -> Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;

    if let Err(e) = file.try_lock_exclusive() {
        if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            return Err(LockError::Held {
                resource: resource_name(path),
                holder: read_holder(&mut file),
            });
        }
        return Err(LockError::Io {
            path: path.to_path_buf(),
            source: e,
        });
    }

    if let Err(source) = write_holder(&mut file) {
        let _ = FileExt::unlock(&file);
        return Err(LockError::Io {
            path: path.to_path_buf(),
            source,
        });
    }

    Ok(file)
}

fn resource_name(path: &Path) -> String {
    format!("lock file {}", path.display())
}

/// Records the current process as holder.
fn write_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_data()
}

/// Best effort read of the pid written by the current holder.
fn read_holder(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}
