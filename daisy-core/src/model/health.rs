//! Service health report.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reachability of one dependent service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub reachable: bool,
    #[serde(rename = "response_time_ms", with = "crate::model::duration_ms")]
    pub response_time: Duration,
    /// `None` until the first probe completes.
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// The last probe result is older than the polling cadence allows.
    #[serde(default)]
    pub stale: bool,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            reachable: false,
            response_time: Duration::ZERO,
            last_check: None,
            consecutive_failures: 0,
            stale: true,
        }
    }
}

/// Composite health of the host service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    /// Milliseconds since the host context was created.
    #[serde(with = "crate::model::duration_ms")]
    pub uptime: Duration,
    pub active_sessions: usize,
    pub rust_service: ServiceHealth,
    pub components: BTreeMap<String, bool>,
}
