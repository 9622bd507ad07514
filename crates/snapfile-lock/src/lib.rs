//! Cross-process exclusive locks for snapfile.
//!
//! A [`Locker`] arbitrates single ownership of a named resource between OS
//! processes on one machine. Two strategies are available:
//!
//! - [`PortLock`] - binds a loopback TCP port; the OS refuses a second bind.
//!   Acquisition retries until it succeeds or is cancelled.
//! - [`FileLock`] - takes an advisory lock on a file path. Acquisition fails
//!   immediately when another owner holds the lock.
//!
//! # Example
//!
//! ```no_run
//! use snapfile_lock::Locker;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> snapfile_lock::Result<()> {
//! let mut locker = Locker::file("/var/lib/app/state.lock");
//! locker.acquire(&CancellationToken::new()).await?;
//!
//! // ... exclusive section ...
//!
//! locker.release();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod file;
pub mod locker;
pub mod port;

pub use error::{LockError, Result};
pub use file::FileLock;
pub use locker::Locker;
pub use port::{PortLock, DEFAULT_RETRY_INTERVAL};
