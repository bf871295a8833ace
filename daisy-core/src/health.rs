//! Composite health for the host.
//!
//! `healthy` requires all three of:
//!
//! - the capture service answered its last ping,
//! - active sessions are below capacity,
//! - no session has been stuck in `error` past the threshold.
//!
//! [`HealthAggregator::check`] pings the dependency (bounded by a
//! timeout); [`HealthAggregator::snapshot`] never blocks on it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::error::DaisyError;
use crate::model::{HealthStatus, ServiceHealth};
use crate::ports::DependencyProbe;
use crate::session::SessionRegistry;

pub const COMPONENT_CAPTURE_SERVICE: &str = "capture_service";
pub const COMPONENT_CAPACITY: &str = "capacity";
pub const COMPONENT_SESSIONS: &str = "sessions";

struct ProbeState {
    health: ServiceHealth,
    checked_at: Option<Instant>,
}

/// Pings the dependency and combines the result with registry counts.
pub struct HealthAggregator {
    config: HealthConfig,
    probe: Arc<dyn DependencyProbe>,
    version: String,
    started: Instant,
    state: Mutex<ProbeState>,
}

impl HealthAggregator {
    pub fn new(config: HealthConfig, probe: Arc<dyn DependencyProbe>, version: impl Into<String>) -> Self {
        Self {
            config,
            probe,
            version: version.into(),
            started: Instant::now(),
            state: Mutex::new(ProbeState {
                health: ServiceHealth::default(),
                checked_at: None,
            }),
        }
    }

    /// Ping the dependency once and return a fresh status.
    ///
    /// A timeout counts as unreachable; it is not retried here.
    pub async fn check(&self, registry: &SessionRegistry) -> HealthStatus {
        let timeout = self.config.probe_timeout;
        let outcome = match tokio::time::timeout(timeout, self.probe.ping(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(DaisyError::Timeout(timeout)),
        };
        self.record(outcome);
        self.snapshot(registry)
    }

    /// Fold one probe outcome into the stored dependency health.
    pub fn record(&self, outcome: Result<Duration, DaisyError>) {
        self.record_at(outcome, Instant::now());
    }

    pub fn record_at(&self, outcome: Result<Duration, DaisyError>, now: Instant) {
        let mut state = self.state.lock();
        state.checked_at = Some(now);
        let health = &mut state.health;
        health.last_check = Some(Utc::now());
        match outcome {
            Ok(rtt) => {
                if !health.reachable {
                    debug!(rtt = ?rtt, "capture service reachable");
                }
                health.reachable = true;
                health.response_time = rtt;
                health.consecutive_failures = 0;
            }
            Err(e) => {
                health.reachable = false;
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                let err = DaisyError::DependencyUnreachable(e.to_string());
                warn!(failures = health.consecutive_failures, "{err}");
            }
        }
    }

    /// Current status from the last probe result and live registry counts.
    pub fn snapshot(&self, registry: &SessionRegistry) -> HealthStatus {
        self.snapshot_at(registry, Instant::now())
    }

    pub fn snapshot_at(&self, registry: &SessionRegistry, now: Instant) -> HealthStatus {
        let mut service = {
            let state = self.state.lock();
            let mut health = state.health.clone();
            health.stale = match state.checked_at {
                Some(at) => now.saturating_duration_since(at) > self.config.poll_interval * 2,
                None => true,
            };
            health
        };
        if service.last_check.is_none() {
            service.reachable = false;
        }

        let active = registry.active_count();
        let stuck = registry.stuck_in_error(self.config.error_threshold, Utc::now());

        let capacity_ok = active < self.config.capacity;
        let sessions_ok = stuck.is_empty();
        let components = BTreeMap::from([
            (COMPONENT_CAPTURE_SERVICE.to_string(), service.reachable),
            (COMPONENT_CAPACITY.to_string(), capacity_ok),
            (COMPONENT_SESSIONS.to_string(), sessions_ok),
        ]);

        HealthStatus {
            healthy: service.reachable && capacity_ok && sessions_ok,
            version: self.version.clone(),
            uptime: now.saturating_duration_since(self.started),
            active_sessions: active,
            rust_service: service,
            components,
        }
    }

    /// Delay before the next poll: the base interval, doubled per
    /// consecutive failure and capped.
    pub fn next_poll_delay(&self) -> Duration {
        let failures = self.state.lock().health.consecutive_failures;
        let exp = failures.min(16);
        self.config
            .poll_interval
            .saturating_mul(1u32 << exp)
            .min(self.config.max_backoff)
    }
}

// ── Tests ────────────────────────────────────────────────────────
