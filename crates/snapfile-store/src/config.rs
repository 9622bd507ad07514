//! Store configuration.

use std::time::Duration;

use tracing::warn;

/// Environment variable overriding [`StoreConfig::lock_timeout`], in milliseconds.
pub const LOCK_TIMEOUT_ENV: &str = "SNAPFILE_LOCK_TIMEOUT_MS";

/// Environment variable overriding [`StoreConfig::sync_on_save`] (`true`/`false`, `1`/`0`).
pub const SYNC_ON_SAVE_ENV: &str = "SNAPFILE_SYNC_ON_SAVE";

/// Configuration for a [`SnapFile`](crate::SnapFile).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long opening waits for the lock before giving up.
    pub lock_timeout: Duration,
    /// Whether to fsync the temp file before renaming it over the target.
    pub sync_on_save: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(1),
            sync_on_save: true,
        }
    }
}

impl StoreConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `SNAPFILE_LOCK_TIMEOUT_MS` and
    /// `SNAPFILE_SYNC_ON_SAVE` when set. Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::default().apply_overrides(
            std::env::var(LOCK_TIMEOUT_ENV).ok().as_deref(),
            std::env::var(SYNC_ON_SAVE_ENV).ok().as_deref(),
        )
    }

    /// Sets the lock acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether saves fsync before committing.
    pub fn with_sync_on_save(mut self, sync: bool) -> Self {
        self.sync_on_save = sync;
        self
    }

    fn apply_overrides(mut self, lock_timeout_ms: Option<&str>, sync_on_save: Option<&str>) -> Self {
        if let Some(raw) = lock_timeout_ms {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.lock_timeout = Duration::from_millis(ms),
                Err(_) => warn!(var = LOCK_TIMEOUT_ENV, value = raw, "ignoring invalid value"),
            }
        }

        if let Some(raw) = sync_on_save {
            match parse_bool(raw) {
                Some(sync) => self.sync_on_save = sync,
                None => warn!(var = SYNC_ON_SAVE_ENV, value = raw, "ignoring invalid value"),
            }
        }

        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
