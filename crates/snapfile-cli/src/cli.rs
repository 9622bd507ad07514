//! Command-line interface definition using clap.

use clap::{Args, Parser, Subcommand};
use snapfile_store::{Locker, PortLock};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// snapfile - inspect and exercise crash-safe state files
#[derive(Parser, Debug)]
#[command(name = "snapfile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding state and lock files
    #[arg(short, long, env = "SNAPFILE_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a counter daemon that saves its value on every tick
    Counter {
        /// Counter name; state lives in <state-dir>/<name>.json
        #[arg(required = true)]
        name: String,

        #[command(flatten)]
        lock: LockArgs,

        /// Milliseconds between increments
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after this many increments (runs until Ctrl+C if omitted)
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Pretty-print a snapshot file without taking its lock
    Show {
        /// Snapshot path
        #[arg(required = true)]
        path: PathBuf,
    },

    /// Report whether a lock is currently free
    Probe {
        #[command(flatten)]
        lock: LockArgs,

        /// How long to wait for a port lock before reporting it held
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
}

/// Lock selection shared by subcommands.
#[derive(Args, Debug, Clone, Default)]
pub struct LockArgs {
    /// Guard with a loopback TCP port
    #[arg(long, conflicts_with = "lock_file")]
    pub port: Option<u16>,

    /// Guard with an advisory lock on this file
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Retry interval for port locks, in milliseconds
    #[arg(long, default_value_t = 1000, requires = "port")]
    pub retry_ms: u64,
}

impl LockArgs {
    /// The locker the user asked for, if any.
    pub fn explicit(&self) -> Option<Locker> {
        if let Some(port) = self.port {
            let lock = PortLock::new(port).with_retry_interval(Duration::from_millis(self.retry_ms));
            return Some(lock.into());
        }
        self.lock_file.as_ref().map(Locker::file)
    }

    /// The locker the user asked for, or a file lock at `default_path`.
    pub fn or_file(&self, default_path: &Path) -> Locker {
        self.explicit()
            .unwrap_or_else(|| Locker::file(default_path))
    }
}

impl Cli {
    /// Returns the state directory path, using default if not specified.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".snapfile"))
                .unwrap_or_else(|| PathBuf::from(".snapfile"))
        })
    }

    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}
