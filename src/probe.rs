// src/probe.rs

//! Readiness polling for a freshly started backend.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::errors::RefreshError;

/// Default pause between connection attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Polls a TCP address until something accepts a connection.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    addr: SocketAddr,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl ReadinessProbe {
    /// A probe without a deadline: `wait_ready` only returns once the
    /// address accepts a connection (or the future is dropped).
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait until a connection to the address succeeds. The probe
    /// connection is closed straight away.
    ///
    /// Fails only when a timeout is configured and has passed.
    pub async fn wait_ready(&self) -> Result<(), RefreshError> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match TcpStream::connect(self.addr).await {
                Ok(conn) => {
                    drop(conn);
                    debug!(
                        addr = %self.addr,
                        attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "backend accepting connections"
                    );
                    return Ok(());
                }
                Err(e) => trace!(addr = %self.addr, attempts, error = %e, "backend not ready yet"),
            }

            if let Some(limit) = self.timeout {
                if started.elapsed() >= limit {
                    return Err(RefreshError::ReadinessTimeout {
                        addr: self.addr,
                        waited: started.elapsed(),
                    });
                }
            }

            sleep(self.poll_interval).await;
        }
    }
}
