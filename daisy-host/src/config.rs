//! Configuration for the Daisy host service.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use daisy_core::{
    AdapterConfig, ConnectionType, ControllerConfig, DriverConfig, HealthConfig, PairingConfig,
    ProfileOverride, RegistryConfig,
};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// The capture service the host depends on.
    pub capture_service: CaptureServiceConfig,
    /// Session lifetimes and driver deadlines.
    pub sessions: SessionsConfig,
    /// Adaptation thresholds and per-link profile overrides.
    pub quality: QualityConfig,
    /// Health polling.
    pub health: HealthSection,
    /// Pairing codes.
    pub pairing: PairingSection,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Capture service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureServiceConfig {
    /// `host:port` probed with a TCP connect.
    pub address: String,
    /// Probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
}

/// Session lifetimes and driver deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub idle_timeout_secs: u64,
    /// How long a disconnected session stays queryable.
    pub retention_secs: u64,
    pub reconnect_window_secs: u64,
    pub max_retries: u32,
    pub handshake_timeout_ms: u64,
    pub telemetry_timeout_ms: u64,
    pub teardown_timeout_ms: u64,
    /// First automatic reconnect delay; doubles per retry.
    pub retry_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub auto_reconnect: bool,
    pub reaper_interval_secs: u64,
    /// How long shutdown waits for sessions to drain.
    pub shutdown_grace_secs: u64,
}

/// Adaptation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Weight of the newest sample in the moving averages (0..=1).
    pub ewma_weight: f64,
    /// Loss percentage above which a sample is bad.
    pub loss_high_water: f64,
    /// Loss percentage below which a sample may be good.
    pub loss_low_water: f64,
    pub good_window: u32,
    pub poor_window: u32,
    /// Per-connection-type profile overrides, keyed `usb`, `ethernet`,
    /// `wifi6`, `wifi5`, `wifi4` or `unknown`.
    pub overrides: BTreeMap<String, ProfileOverride>,
}

/// Health polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Active sessions must stay below this for the host to be healthy.
    pub capacity: usize,
    pub poll_interval_secs: u64,
    /// Upper bound on the poll delay while the dependency is down.
    pub max_backoff_secs: u64,
    /// A session stuck in error this long marks the host unhealthy.
    pub error_threshold_secs: u64,
}

/// Pairing codes and the tokens they mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingSection {
    pub code_ttl_secs: u64,
    pub token_ttl_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CaptureServiceConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8765".into(),
            probe_timeout_ms: 2_000,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30,
            retention_secs: 300,
            reconnect_window_secs: 20,
            max_retries: 3,
            handshake_timeout_ms: 5_000,
            telemetry_timeout_ms: 5_000,
            teardown_timeout_ms: 3_000,
            retry_backoff_ms: 500,
            max_backoff_ms: 8_000,
            auto_reconnect: true,
            reaper_interval_secs: 5,
            shutdown_grace_secs: 5,
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        let adapter = AdapterConfig::default();
        Self {
            ewma_weight: adapter.ewma_weight,
            loss_high_water: adapter.loss_high_water,
            loss_low_water: adapter.loss_low_water,
            good_window: adapter.good_window,
            poor_window: adapter.poor_window,
            overrides: BTreeMap::new(),
        }
    }
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            capacity: 4,
            poll_interval_secs: 10,
            max_backoff_secs: 120,
            error_threshold_secs: 30,
        }
    }
}

impl Default for PairingSection {
    fn default() -> Self {
        Self {
            code_ttl_secs: 300,
            token_ttl_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert to the core's config, clamping values that would stall
    /// or invert the control loops.
    pub fn to_controller_config(&self) -> ControllerConfig {
        let s = &self.sessions;
        let q = &self.quality;
        let h = &self.health;

        let mut profile_overrides = BTreeMap::new();
        for (name, o) in &q.overrides {
            match name.parse::<ConnectionType>() {
                Ok(ct) => {
                    profile_overrides.insert(ct, *o);
                }
                Err(e) => tracing::warn!("ignoring quality override: {e}"),
            }
        }

        let loss_high_water = q.loss_high_water.clamp(0.0, 100.0);
        let handshake_timeout = millis(s.handshake_timeout_ms, 100);
        let retry_backoff = millis(s.retry_backoff_ms, 10);

        ControllerConfig {
            registry: RegistryConfig {
                idle_timeout: secs(s.idle_timeout_secs, 1),
                retention: secs(s.retention_secs, 0),
                reconnect_window: secs(s.reconnect_window_secs, 1),
                max_retries: s.max_retries,
            },
            adapter: AdapterConfig {
                ewma_weight: q.ewma_weight.clamp(0.01, 1.0),
                loss_high_water,
                loss_low_water: q.loss_low_water.clamp(0.0, loss_high_water),
                good_window: q.good_window.max(1),
                poor_window: q.poor_window.max(1),
                ..AdapterConfig::default()
            },
            profile_overrides,
            driver: DriverConfig {
                handshake_timeout,
                telemetry_timeout: millis(s.telemetry_timeout_ms, 100),
                teardown_timeout: millis(s.teardown_timeout_ms, 100),
                retry_backoff,
                max_backoff: millis(s.max_backoff_ms, 10).max(retry_backoff),
                auto_reconnect: s.auto_reconnect,
                ..DriverConfig::default()
            },
            health: HealthConfig {
                capacity: h.capacity.max(1),
                probe_timeout: millis(self.capture_service.probe_timeout_ms, 10),
                poll_interval: secs(h.poll_interval_secs, 1),
                max_backoff: secs(h.max_backoff_secs, 1).max(secs(h.poll_interval_secs, 1)),
                error_threshold: secs(h.error_threshold_secs, 1),
            },
            pairing: PairingConfig {
                code_ttl: secs(self.pairing.code_ttl_secs, 1),
                token_ttl: secs(self.pairing.token_ttl_secs, 1),
            },
            reaper_interval: secs(s.reaper_interval_secs, 1),
            shutdown_grace: secs(s.shutdown_grace_secs, 0),
            ..ControllerConfig::default()
        }
    }
}

fn secs(value: u64, min: u64) -> Duration {
    Duration::from_secs(value.max(min))
}

fn millis(value: u64, min: u64) -> Duration {
    Duration::from_millis(value.max(min))
}

// ── Tests ────────────────────────────────────────────────────────
