//! Runtime configuration for the control plane.
//!
//! Plain structs with sensible defaults. The host binary fills these from
//! its TOML file; tests construct them directly.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::model::ConnectionType;
use crate::quality::{AdapterConfig, ProfileOverride, ProfileTable};

// ── RegistryConfig ───────────────────────────────────────────────

/// Session lifetime limits enforced by the registry and its reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// A non-error session with no activity for this long is failed.
    pub idle_timeout: Duration,
    /// How long a `disconnected` session stays queryable.
    pub retention: Duration,
    /// How long an `error` session may wait for a reconnect.
    pub reconnect_window: Duration,
    /// A reconnect is refused once the session has entered `error` this many times.
    pub max_retries: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(300),
            reconnect_window: Duration::from_secs(20),
            max_retries: 3,
        }
    }
}

// ── DriverConfig ─────────────────────────────────────────────────

/// Deadlines and retry policy for per-session driver tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub handshake_timeout: Duration,
    /// Maximum gap between two telemetry samples while streaming.
    pub telemetry_timeout: Duration,
    pub teardown_timeout: Duration,
    /// Delay before the first automatic reconnect; doubles per retry.
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Retry from `error` without waiting for the client.
    pub auto_reconnect: bool,
    /// Capacity of each session's command channel.
    pub command_buffer: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            telemetry_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(3),
            retry_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            auto_reconnect: true,
            command_buffer: 16,
        }
    }
}

impl DriverConfig {
    /// Backoff before automatic reconnect attempt number `retries`.
    pub fn backoff_for(&self, retries: u32) -> Duration {
        let exp = retries.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

// ── HealthConfig ─────────────────────────────────────────────────

/// Dependency probing and health thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    /// Active sessions must stay below this for the host to be healthy.
    pub capacity: usize,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound for the poll delay after repeated failures.
    pub max_backoff: Duration,
    /// A session in `error` longer than this marks the host unhealthy.
    pub error_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            probe_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(120),
            error_threshold: Duration::from_secs(30),
        }
    }
}

// ── PairingConfig ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingConfig {
    /// Lifetime of an issued pairing code.
    pub code_ttl: Duration,
    /// Lifetime of a minted session token that has not been redeemed.
    pub token_ttl: Duration,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(300),
            token_ttl: Duration::from_secs(300),
        }
    }
}

// ── ControllerConfig ─────────────────────────────────────────────

/// Everything a [`HostContext`](crate::HostContext) needs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub registry: RegistryConfig,
    pub adapter: AdapterConfig,
    pub profile_overrides: BTreeMap<ConnectionType, ProfileOverride>,
    pub driver: DriverConfig,
    pub health: HealthConfig,
    pub pairing: PairingConfig,
    /// Interval between reaper sweeps.
    pub reaper_interval: Duration,
    /// How long shutdown waits for session drains before aborting.
    pub shutdown_grace: Duration,
    /// Reported in [`HealthStatus::version`](crate::model::HealthStatus).
    pub version: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            adapter: AdapterConfig::default(),
            profile_overrides: BTreeMap::new(),
            driver: DriverConfig::default(),
            health: HealthConfig::default(),
            pairing: PairingConfig::default(),
            reaper_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ControllerConfig {
    /// Resolve built-in profiles against the configured overrides.
    pub fn profiles(&self) -> ProfileTable {
        ProfileTable::new(&self.profile_overrides)
    }
}
