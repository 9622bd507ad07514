//! The locking strategy chosen by the caller.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::file::FileLock;
use crate::port::PortLock;

/// A cross-process exclusive lock, backed by one of the supported strategies.
///
/// Consumers only see `acquire` / `release`; which primitive sits underneath
/// is decided once, when the locker is built.
#[derive(Debug)]
pub enum Locker {
    /// Loopback TCP port. Acquisition retries until cancelled.
    Port(PortLock),
    /// Advisory file lock. Acquisition fails immediately when contended.
    File(FileLock),
}

impl Locker {
    /// Port lock on `127.0.0.1:port` with the default retry interval.
    pub fn port(port: u16) -> Self {
        Locker::Port(PortLock::new(port))
    }

    /// Advisory lock on `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Locker::File(FileLock::new(path))
    }

    /// Takes ownership of the resource.
    ///
    /// `cancel` stops a port lock's retry loop; file locks never wait and
    /// ignore it. File locking runs on the blocking thread pool.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<()> {
        match self {
            Locker::Port(lock) => lock.acquire(cancel).await,
            Locker::File(lock) => lock.acquire().await,
        }
    }

    /// Like [`acquire`](Self::acquire), but cancels the attempt once
    /// `timeout` has elapsed. A port lock that is still contended then fails
    /// with [`LockError::Cancelled`](crate::LockError::Cancelled) and its
    /// retry loop stops.
    pub async fn acquire_within(&mut self, timeout: Duration) -> Result<()> {
        let cancel = CancellationToken::new();
        let deadline = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };

        let result = self.acquire(&cancel).await;
        deadline.abort();
        result
    }

    /// Gives up ownership. Safe to call when not held.
    pub fn release(&mut self) {
        match self {
            Locker::Port(lock) => lock.release(),
            Locker::File(lock) => lock.release(),
        }
    }

    /// Whether the resource is currently held by this locker.
    pub fn is_held(&self) -> bool {
        match self {
            Locker::Port(lock) => lock.is_held(),
            Locker::File(lock) => lock.is_held(),
        }
    }

    /// Human readable identifier of the guarded resource.
    pub fn resource(&self) -> String {
        match self {
            Locker::Port(lock) => lock.resource(),
            Locker::File(lock) => lock.resource(),
        }
    }
}

impl From<PortLock> for Locker {
    fn from(lock: PortLock) -> Self {
        Locker::Port(lock)
    }
}

impl From<FileLock> for Locker {
    fn from(lock: FileLock) -> Self {
        Locker::File(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_locker_excludes_second_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.lock");
        let cancel = CancellationToken::new();

        let mut first = Locker::file(&path);
        let mut second = Locker::file(&path);

        first.acquire(&cancel).await.unwrap();
        let err = second.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, LockError::Held { .. }));

        first.release();
        second.acquire(&cancel).await.unwrap();
        assert!(second.is_held());
    }

    #[tokio::test]
    async fn test_port_locker_waits_until_cancelled() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut first = Locker::port(port);
        first.acquire(&CancellationToken::new()).await.unwrap();

        let mut second: Locker = PortLock::new(port)
            .with_retry_interval(Duration::from_millis(10))
            .into();
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(40)).await;
                cancel.cancel();
            })
        };

        let err = second.acquire(&cancel).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, LockError::Cancelled { .. }));
        assert!(!second.is_held());
    }

    #[tokio::test]
    async fn test_acquire_within_gives_up_on_contended_port() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut first = Locker::port(port);
        first.acquire(&CancellationToken::new()).await.unwrap();

        let mut second = Locker::port(port);
        let started = std::time::Instant::now();
        let err = second
            .acquire_within(Duration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, LockError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_acquire_within_free_file_lock() {
        let dir = tempdir().unwrap();
        let mut locker = Locker::file(dir.path().join("free.lock"));

        locker.acquire_within(Duration::from_secs(1)).await.unwrap();
        assert!(locker.is_held());
    }

    #[test]
    fn test_resource_describes_strategy() {
        assert_eq!(Locker::port(4200).resource(), "port 127.0.0.1:4200");
        assert_eq!(
            Locker::file("/var/lib/app/state.lock").resource(),
            "lock file /var/lib/app/state.lock"
        );
    }

    #[test]
    fn test_release_unheld() {
        let mut locker = Locker::port(4201);
        locker.release();
        assert!(!locker.is_held());
    }
}
