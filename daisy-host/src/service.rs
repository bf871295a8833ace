//! Host service core logic.
//!
//! Builds the [`HostContext`], registers the startup pairing code, and
//! keeps the health poller and reaper running until stopped. Stopping
//! drains every session before `run` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use daisy_core::{HostContext, MediaPipeline, Transport};

use crate::config::HostConfig;
use crate::detached::{DetachedPipeline, DetachedTransport};
use crate::probe::TcpProbe;

// ── HostService ──────────────────────────────────────────────────

/// The top-level Daisy host service.
pub struct HostService {
    config: HostConfig,
    pairing_code: Option<String>,
    stop: CancellationToken,
    running: AtomicBool,
    context: OnceLock<Arc<HostContext>>,
}

impl HostService {
    /// Create a new host service with the given config.
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            pairing_code: None,
            stop: CancellationToken::new(),
            running: AtomicBool::new(false),
            context: OnceLock::new(),
        }
    }

    /// Register `code` at startup instead of generating one.
    pub fn with_pairing_code(mut self, code: impl Into<String>) -> Self {
        self.pairing_code = Some(code.into());
        self
    }

    /// Obtain a handle that stops the service from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The live context, once `run` has started.
    pub fn context(&self) -> Option<&Arc<HostContext>> {
        self.context.get()
    }

    /// Run with no capture pipeline attached.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_with(Arc::new(DetachedTransport), Arc::new(DetachedPipeline))
            .await
    }

    /// Run until stopped.
    ///
    /// 1. Builds the context with a TCP probe on the capture service.
    /// 2. Registers (or generates) a pairing code.
    /// 3. Runs health polling and the reaper in the background.
    /// 4. On stop, drains every session and returns.
    pub async fn run_with(
        &self,
        transport: Arc<dyn Transport>,
        pipeline: Arc<dyn MediaPipeline>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err("host service is already running".into());
        }

        let controller = self.config.to_controller_config();
        let probe = Arc::new(TcpProbe::new(&self.config.capture_service.address));
        let ctx = HostContext::new(controller, transport, pipeline, probe);
        if self.context.set(ctx.clone()).is_err() {
            warn!("host context already initialised; keeping the first one");
        }

        let code = match &self.pairing_code {
            Some(code) => {
                if let Err(e) = ctx.register_pairing_code(code.clone()) {
                    self.running.store(false, Ordering::SeqCst);
                    ctx.shutdown().await;
                    return Err(e.into());
                }
                code.clone()
            }
            None => ctx.issue_pairing_code(),
        };
        info!(
            code = %code,
            ttl_secs = self.config.pairing.code_ttl_secs,
            "pairing code ready"
        );

        let maintenance = tokio::spawn({
            let ctx = ctx.clone();
            let stop = self.stop.child_token();
            async move { ctx.run_maintenance(stop).await }
        });

        info!(
            capture_service = %self.config.capture_service.address,
            "daisy host running"
        );
        self.stop.cancelled().await;

        if let Err(e) = maintenance.await {
            warn!("maintenance task failed: {e}");
        }
        let aborted = ctx.shutdown().await;
        if aborted > 0 {
            warn!(aborted, "session drivers aborted at shutdown");
        }

        self.running.store(false, Ordering::SeqCst);
        info!("daisy host stopped");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use daisy_core::PairingRequest;
    use tokio::net::TcpListener;

    #[test]
    fn service_creates_with_defaults() {
        let svc = HostService::new(HostConfig::default());
        assert!(!svc.is_running());
        assert!(svc.context().is_none());
    }

    #[tokio::test]
    async fn stop_handle_ends_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = HostConfig::default();
        config.capture_service.address = listener.local_addr().unwrap().to_string();

        let svc = Arc::new(HostService::new(config).with_pairing_code("123456"));
        let stop = svc.stop_handle();
        let handle = tokio::spawn({
            let svc = svc.clone();
            async move { svc.run().await.map_err(|e| e.to_string()) }
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let ctx = loop {
            if let Some(ctx) = svc.context() {
                if ctx.health().rust_service.last_check.is_some() {
                    break ctx.clone();
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "service never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert!(svc.is_running());
        assert!(ctx.health().rust_service.reachable);

        let response = ctx.authorize(&PairingRequest::new("123456", "ipad-1", "iPad"));
        assert!(response.success);

        stop.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("timeout")
            .unwrap();
        assert!(result.is_ok());
        assert!(!svc.is_running());
    }

    #[tokio::test]
    async fn blank_pairing_code_fails_startup() {
        let svc = HostService::new(HostConfig::default()).with_pairing_code("   ");
        let result = svc.run().await;
        assert!(result.is_err());
        assert!(!svc.is_running());
    }
}
