//! Command handlers for CLI subcommands.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapfile_store::atomic::read_snapshot;
use snapfile_store::{JsonCodec, LockError, Locker, SnapFile, StoreConfig, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{Commands, LockArgs};

/// Errors surfaced to the user by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to render snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no snapshot at {}", .0.display())]
    Missing(PathBuf),

    #[error("cannot prepare state directory {}: {source}", path.display())]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("counter state is poisoned: {0}")]
    LockPoisoned(String),

    #[error("{0}")]
    Held(String),
}

impl CliError {
    /// Process exit code for this error. A held lock is a normal answer
    /// for `probe`, so it gets its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Held(_) => 2,
            _ => 1,
        }
    }
}

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// Persisted state of the `counter` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub value: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Execute a CLI command.
pub async fn execute(command: Commands, state_dir: &Path) -> Result<()> {
    match command {
        Commands::Counter {
            name,
            lock,
            interval_ms,
            ticks,
        } => {
            let cancel = CancellationToken::new();
            let ctrl_c = spawn_ctrl_c(cancel.clone());
            let result = cmd_counter(
                state_dir,
                &name,
                &lock,
                Duration::from_millis(interval_ms),
                ticks,
                &cancel,
            )
            .await;
            ctrl_c.abort();
            result.map(|_| ())
        }
        Commands::Show { path } => cmd_show(&path).await,
        Commands::Probe { lock, timeout_ms } => {
            cmd_probe(state_dir, &lock, Duration::from_millis(timeout_ms)).await
        }
    }
}

fn spawn_ctrl_c(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping");
            cancel.cancel();
        }
    })
}

/// Increments a persisted counter every `interval` until cancelled or until
/// `ticks` increments have been made. Returns the final value.
pub async fn cmd_counter(
    state_dir: &Path,
    name: &str,
    lock: &LockArgs,
    interval: Duration,
    ticks: Option<u64>,
    cancel: &CancellationToken,
) -> Result<u64> {
    ensure_state_dir(state_dir)?;

    let path = state_dir.join(format!("{}.json", name));
    let locker = lock.or_file(&state_dir.join(format!("{}.lock", name)));
    let counter = Arc::new(RwLock::new(Counter::default()));

    let file = SnapFile::open_with(
        Arc::clone(&counter),
        &path,
        locker,
        StoreConfig::from_env(),
        JsonCodec::pretty(),
    )
    .await?;

    let start = current(&counter)?.value;
    if file.restored() {
        println!("Resuming '{}' at {}", name, start);
    } else {
        println!("Starting '{}' at {}", name, start);
    }

    let mut interval = tokio::time::interval(interval);
    let mut done = 0u64;

    while ticks.map_or(true, |limit| done < limit) {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let value = {
            let mut guard = counter
                .write()
                .map_err(|e| CliError::LockPoisoned(e.to_string()))?;
            guard.value += 1;
            guard.updated_at = Some(Utc::now());
            guard.value
        };
        done += 1;

        match file.save().await {
            Ok(()) => debug!(counter = %name, value, "saved"),
            Err(e) => warn!(counter = %name, value, error = %e, "save failed, will retry next tick"),
        }
    }

    let last = current(&counter)?.value;
    file.close().await?;
    println!("Stopped '{}' at {}", name, last);
    Ok(last)
}

fn ensure_state_dir(state_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(state_dir).map_err(|source| CliError::StateDir {
        path: state_dir.to_path_buf(),
        source,
    })
}

fn current(counter: &RwLock<Counter>) -> Result<Counter> {
    counter
        .read()
        .map(|c| c.clone())
        .map_err(|e| CliError::LockPoisoned(e.to_string()))
}

/// Prints a snapshot as pretty JSON. Does not take the lock; the atomic
/// rename guarantees a complete file either way.
pub async fn cmd_show(path: &Path) -> Result<()> {
    let value = read_value(path).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn read_value(path: &Path) -> Result<serde_json::Value> {
    let owned = path.to_path_buf();
    let loaded = tokio::task::spawn_blocking(move || {
        read_snapshot::<serde_json::Value, _>(&owned, &JsonCodec::new())
    })
    .await
    .map_err(|e| {
        CliError::Store(StoreError::Load {
            path: path.to_path_buf(),
            source: std::io::Error::other(e.to_string()),
        })
    })??;

    loaded.ok_or_else(|| CliError::Missing(path.to_path_buf()))
}

/// Reports whether the chosen lock can be taken right now. The lock is
/// released again immediately.
pub async fn cmd_probe(state_dir: &Path, lock: &LockArgs, timeout: Duration) -> Result<()> {
    let mut locker = match lock.explicit() {
        Some(locker) => locker,
        None => {
            ensure_state_dir(state_dir)?;
            Locker::file(state_dir.join("snapfile.lock"))
        }
    };
    let resource = locker.resource();

    match locker.acquire_within(timeout).await {
        Ok(()) => {
            locker.release();
            println!("{}: free", resource);
            Ok(())
        }
        Err(LockError::Held { holder, .. }) => {
            let message = match holder {
                Some(pid) => format!("{}: held by pid {}", resource, pid),
                None => format!("{}: held", resource),
            };
            println!("{}", message);
            Err(CliError::Held(message))
        }
        Err(LockError::Cancelled {
            last_error: Some(e),
            ..
        }) if e.kind() != std::io::ErrorKind::AddrInUse => Err(StoreError::LockTimeout {
            resource,
            timeout,
            last_error: Some(e.to_string()),
        }
        .into()),
        Err(LockError::Cancelled { .. }) => {
            let message = format!("{}: held (not free within {:?})", resource, timeout);
            println!("{}", message);
            Err(CliError::Held(message))
        }
        Err(source) => Err(StoreError::Lock { resource, source }.into()),
    }
}
