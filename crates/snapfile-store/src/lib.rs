//! Crash-safe persistence of a single shared object.
//!
//! This crate keeps one authoritative in-memory value on disk for a
//! long-running process:
//! - `SnapFile` - owns the snapshot file and the cross-process lock, and
//!   serializes every save through one background writer
//! - `atomic` - temp-file-then-rename snapshot helpers
//! - `Codec` - pluggable encoding, JSON by default
//!
//! # Lifecycle
//!
//! 1. `SnapFile::open` acquires the [`Locker`] (bounded by
//!    [`StoreConfig::lock_timeout`]), loads an existing snapshot into the
//!    object, and starts the writer.
//! 2. The caller mutates the object through its `RwLock` and calls
//!    `SnapFile::save`, which resolves once the snapshot is committed.
//! 3. `SnapFile::close` drains pending saves and releases the lock.
//!
//! A crash at any point leaves either the previous snapshot or the new one
//! on disk, never a mix.

pub mod atomic;
pub mod codec;
pub mod config;
pub mod error;
pub mod store;
mod writer;

pub use codec::{Codec, CodecError, JsonCodec};
pub use config::StoreConfig;
pub use error::{ErrorKind, Result, StoreError};
pub use snapfile_lock::{FileLock, LockError, Locker, PortLock};
pub use store::SnapFile;
