//! Loopback port lock.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{LockError, Result};

/// Default wait between bind attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Claims a loopback TCP port as a machine-wide mutex.
///
/// The OS refuses to bind the same address twice, so whichever process holds
/// the listener owns the lock. The listener never accepts connections.
///
/// Port 0 binds an ephemeral port and therefore excludes nothing.
#[derive(Debug)]
pub struct PortLock {
    port: u16,
    retry_interval: Duration,
    listener: Option<TcpListener>,
}

impl PortLock {
    /// Creates an unheld lock on `127.0.0.1:port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            listener: None,
        }
    }

    /// Sets the wait between bind attempts.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// The configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The loopback address this lock binds.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    /// Whether this instance currently holds the port.
    pub fn is_held(&self) -> bool {
        self.listener.is_some()
    }

    /// Human readable identifier for logs and errors.
    pub fn resource(&self) -> String {
        format!("port {}", self.addr())
    }

    /// Binds the port, retrying every `retry_interval` until it succeeds or
    /// `cancel` fires.
    ///
    /// There is no attempt limit; callers bound the wait by cancelling the
    /// token. Acquiring an already held lock is a no-op.
    pub async fn acquire(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }

        let addr = self.addr();
        let mut attempts: u32 = 0;
        let mut last_error = None;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(attempts, last_error));
            }

            attempts += 1;
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    debug!(addr = %addr, attempts, "port lock acquired");
                    self.listener = Some(listener);
                    return Ok(());
                }
                Err(e) => {
                    if e.kind() == ErrorKind::AddrInUse {
                        trace!(addr = %addr, attempts, "port busy, retrying");
                    } else {
                        // Not contention, most likely misconfiguration
                        debug!(addr = %addr, attempts, error = %e, "port bind failed, retrying");
                    }
                    last_error = Some(e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(addr = %addr, attempts, "port lock acquisition cancelled");
                    return Err(self.cancelled(attempts, last_error));
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// Closes the listener. Releasing an unheld lock does nothing.
    pub fn release(&mut self) {
        if self.listener.take().is_some() {
            debug!(addr = %self.addr(), "port lock released");
        }
    }

    fn cancelled(&self, attempts: u32, last_error: Option<std::io::Error>) -> LockError {
        LockError::Cancelled {
            resource: self.resource(),
            attempts,
            last_error,
        }
    }
}
