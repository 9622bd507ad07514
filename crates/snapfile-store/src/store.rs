//! The persisted object handle.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use snapfile_lock::{LockError, Locker};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::atomic::read_snapshot;
use crate::codec::{Codec, JsonCodec};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::writer::{SaveTask, Writer};

/// Owns the on-disk snapshot of one shared object.
///
/// Opening takes the lock, loads any existing snapshot into the object and
/// starts a single background writer. [`save`](Self::save) hands a request to
/// that writer and waits for it, so saves from any number of tasks are
/// committed one after another. [`close`](Self::close) drains the writer and
/// releases the lock.
///
/// The object stays shared with the caller, who mutates it through the
/// `RwLock`. Each save encodes whatever the object holds when the writer gets
/// to it; mutations racing a save are the caller's to order.
///
/// # Example
///
/// ```no_run
/// use std::sync::{Arc, RwLock};
/// use snapfile_store::{Locker, SnapFile};
///
/// # async fn run() -> snapfile_store::Result<()> {
/// let counter = Arc::new(RwLock::new(0u64));
/// let file = SnapFile::open(
///     Arc::clone(&counter),
///     "/var/lib/app/counter.json",
///     Locker::file("/var/lib/app/counter.lock"),
/// )
/// .await?;
///
/// *counter.write().unwrap() += 1;
/// file.save().await?;
/// file.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct SnapFile<T> {
    object: Arc<RwLock<T>>,
    path: PathBuf,
    resource: String,
    restored: bool,
    locker: Option<Locker>,
    tasks: Option<mpsc::Sender<SaveTask>>,
    writer: Option<JoinHandle<()>>,
}

impl<T> SnapFile<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Opens with the default [`StoreConfig`] and [`JsonCodec`].
    pub async fn open(
        object: Arc<RwLock<T>>,
        path: impl Into<PathBuf>,
        locker: Locker,
    ) -> Result<Self> {
        Self::open_with(object, path, locker, StoreConfig::default(), JsonCodec::new()).await
    }

    /// Opens with an explicit configuration and codec.
    ///
    /// # Errors
    /// - [`StoreError::InvalidObject`] if the object lock is poisoned
    /// - [`StoreError::LockTimeout`] / [`StoreError::Lock`] if the lock is not
    ///   acquired; nothing on disk is touched
    /// - [`StoreError::Corrupt`] / [`StoreError::Load`] if an existing
    ///   snapshot cannot be loaded; the lock is released before returning
    pub async fn open_with<C: Codec>(
        object: Arc<RwLock<T>>,
        path: impl Into<PathBuf>,
        mut locker: Locker,
        config: StoreConfig,
        codec: C,
    ) -> Result<Self> {
        let path = path.into();
        let resource = locker.resource();

        if object.is_poisoned() {
            return Err(StoreError::InvalidObject(
                "object lock is poisoned".to_string(),
            ));
        }

        acquire_within(&mut locker, config.lock_timeout).await?;

        let codec = Arc::new(codec);
        let restored = match load_into(&object, &path, Arc::clone(&codec)).await {
            Ok(restored) => restored,
            Err(e) => {
                locker.release();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(1);
        let writer = Writer::new(
            Arc::clone(&object),
            path.clone(),
            codec,
            config.sync_on_save,
            rx,
        );
        let handle = tokio::spawn(writer.run());

        info!(
            path = %path.display(),
            resource = %resource,
            restored,
            "snapfile opened"
        );

        Ok(Self {
            object,
            path,
            resource,
            restored,
            locker: Some(locker),
            tasks: Some(tx),
            writer: Some(handle),
        })
    }
}

impl<T> SnapFile<T> {
    /// Commits the object's current state, waiting until the write finishes.
    ///
    /// A failed save leaves the previous snapshot in place and the store
    /// usable; retrying is up to the caller.
    pub async fn save(&self) -> Result<()> {
        let tasks = self
            .tasks
            .as_ref()
            .ok_or_else(|| StoreError::WorkerStopped("store is closed".to_string()))?;

        let (reply, done) = oneshot::channel();
        tasks
            .send(SaveTask { reply })
            .await
            .map_err(|_| StoreError::WorkerStopped("writer task exited".to_string()))?;

        done.await
            .map_err(|_| StoreError::WorkerStopped("writer dropped the save request".to_string()))?
    }

    /// Stops the writer after pending saves finish, then releases the lock.
    ///
    /// If the returned future is dropped before it completes, the lock is
    /// still held until the writer has drained.
    pub async fn close(mut self) -> Result<()> {
        debug!(path = %self.path.display(), "closing snapfile");

        // No more senders: the writer drains what is queued and exits.
        drop(self.tasks.take());

        // The handle stays in `self` while awaited so `Drop` still sees it.
        let joined = match self.writer.as_mut() {
            Some(handle) => handle
                .await
                .map_err(|e| StoreError::Shutdown(format!("writer task panicked: {}", e))),
            None => Ok(()),
        };
        self.writer = None;

        if let Some(mut locker) = self.locker.take() {
            locker.release();
        }

        info!(path = %self.path.display(), resource = %self.resource, "snapfile closed");
        joined
    }

    /// The shared object.
    pub fn object(&self) -> &Arc<RwLock<T>> {
        &self.object
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The lock resource held while open.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Whether opening loaded an existing snapshot.
    pub fn restored(&self) -> bool {
        self.restored
    }
}

impl<T> Drop for SnapFile<T> {
    fn drop(&mut self) {
        drop(self.tasks.take());

        let Some(locker) = self.locker.take() else {
            return;
        };

        debug!(path = %self.path.display(), "snapfile dropped without close");

        // Keep the lock until the writer has drained.
        match (self.writer.take(), tokio::runtime::Handle::try_current()) {
            (Some(writer), Ok(runtime)) if !writer.is_finished() => {
                runtime.spawn(async move {
                    let _ = writer.await;
                    drop(locker);
                });
            }
            _ => drop(locker),
        }
    }
}

/// Acquires `locker` within `timeout`, mapping failures to store errors.
async fn acquire_within(locker: &mut Locker, timeout: Duration) -> Result<()> {
    let resource = locker.resource();

    match locker.acquire_within(timeout).await {
        Ok(()) => {
            debug!(resource = %resource, "lock acquired");
            Ok(())
        }
        Err(LockError::Cancelled { last_error, .. }) => Err(StoreError::LockTimeout {
            resource,
            timeout,
            last_error: last_error
                .filter(|e| e.kind() != std::io::ErrorKind::AddrInUse)
                .map(|e| e.to_string()),
        }),
        Err(source) => Err(StoreError::Lock { resource, source }),
    }
}

/// Loads an existing snapshot into `object`. Returns false on first run.
async fn load_into<T, C>(object: &RwLock<T>, path: &Path, codec: Arc<C>) -> Result<bool>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
{
    let read_path = path.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || read_snapshot::<T, C>(&read_path, codec.as_ref()))
        .await
        .map_err(|e| StoreError::Load {
            path: path.to_path_buf(),
            source: std::io::Error::other(format!("load task panicked: {}", e)),
        })??;

    match loaded {
        Some(value) => {
            let mut guard = object
                .write()
                .map_err(|_| StoreError::InvalidObject("object lock is poisoned".to_string()))?;
            *guard = value;
            debug!(path = %path.display(), "snapshot loaded");
            Ok(true)
        }
        None => {
            debug!(path = %path.display(), "no snapshot yet");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokio_util::sync::CancellationToken;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_without_snapshot() {
        let dir = tempdir().unwrap();
        let object = Arc::new(RwLock::new(BTreeMap::from([(1, "one".to_string())])));

        let file = SnapFile::open(
            Arc::clone(&object),
            dir.path().join("map.json"),
            Locker::file(dir.path().join("map.lock")),
        )
        .await
        .unwrap();

        assert!(!file.restored());
        assert_eq!(object.read().unwrap().len(), 1);
        assert!(!file.path().exists());
        file.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_save_writes_current_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("count.json");
        let object = Arc::new(RwLock::new(1u32));

        let file = SnapFile::open(
            Arc::clone(&object),
            &path,
            Locker::file(dir.path().join("count.lock")),
        )
        .await
        .unwrap();

        *object.write().unwrap() = 5;
        file.save().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "5");
        file.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_releases_lock() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("state.lock");
        let object = Arc::new(RwLock::new(0u8));

        let file = SnapFile::open(
            Arc::clone(&object),
            dir.path().join("state.json"),
            Locker::file(&lock_path),
        )
        .await
        .unwrap();
        assert_eq!(file.resource(), format!("lock file {}", lock_path.display()));
        file.close().await.unwrap();

        let mut locker = Locker::file(&lock_path);
        locker.acquire(&CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_eventually_releases_lock() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("state.lock");
        let object = Arc::new(RwLock::new(0u8));

        let file = SnapFile::open(
            Arc::clone(&object),
            dir.path().join("state.json"),
            Locker::file(&lock_path),
        )
        .await
        .unwrap();
        drop(file);

        let mut locker = Locker::file(&lock_path);
        let mut acquired = false;
        for _ in 0..50 {
            if locker.acquire(&CancellationToken::new()).await.is_ok() {
                acquired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(acquired);
    }

    #[tokio::test]
    async fn test_acquire_within_reports_timeout() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut holder = Locker::port(port);
        holder.acquire(&CancellationToken::new()).await.unwrap();

        let mut contender = Locker::port(port);
        let err = acquire_within(&mut contender, Duration::from_millis(100))
            .await
            .unwrap_err();

        // Plain contention carries no bind error.
        assert!(matches!(
            err,
            StoreError::LockTimeout {
                last_error: None,
                ..
            }
        ));
        assert!(!contender.is_held());
    }
}
