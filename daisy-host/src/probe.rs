//! Capture-service reachability probe.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;

use daisy_core::{DaisyError, DependencyProbe};

/// Pings the capture service with a plain TCP connect.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl DependencyProbe for TcpProbe {
    async fn ping(&self, timeout: Duration) -> Result<Duration, DaisyError> {
        let start = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_stream)) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(DaisyError::DependencyUnreachable(format!(
                "{}: {e}",
                self.address
            ))),
            Err(_) => Err(DaisyError::Timeout(timeout)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
