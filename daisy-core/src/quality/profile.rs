//! Per-connection-type quality profiles.
//!
//! Each link type carries a bitrate ceiling and floor, a default starting
//! bitrate, the additive increase step, the latency threshold above which
//! conditions count as bad, and the ladder of permitted
//! (resolution, frame rate) tiers ordered best first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ConnectionType, Resolution};

// ── QualityTier ──────────────────────────────────────────────────

/// One rung of a resolution / frame-rate ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityTier {
    pub resolution: Resolution,
    pub frame_rate: u32,
}

const fn tier(width: u32, height: u32, frame_rate: u32) -> QualityTier {
    QualityTier {
        resolution: Resolution::new(width, height),
        frame_rate,
    }
}

const WIRED_LADDER: &[QualityTier] = &[
    tier(2732, 2048, 120),
    tier(2732, 2048, 60),
    tier(2048, 1536, 60),
    tier(1366, 1024, 60),
    tier(1366, 1024, 30),
];

const WIFI6_LADDER: &[QualityTier] = &[
    tier(2732, 2048, 60),
    tier(2048, 1536, 60),
    tier(1366, 1024, 60),
    tier(1366, 1024, 30),
];

const WIFI5_LADDER: &[QualityTier] = &[
    tier(2048, 1536, 60),
    tier(1366, 1024, 60),
    tier(1366, 1024, 30),
];

const WIFI4_LADDER: &[QualityTier] = &[
    tier(1366, 1024, 60),
    tier(1366, 1024, 30),
    tier(1024, 768, 30),
];

// ── QualityProfile ───────────────────────────────────────────────

/// Adaptation bounds for one connection type.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityProfile {
    pub ceiling_bps: u32,
    pub floor_bps: u32,
    pub default_bps: u32,
    pub step_bps: u32,
    pub latency_threshold_ms: f64,
    /// Permitted tiers, best first. Never empty.
    pub ladder: &'static [QualityTier],
}

impl QualityProfile {
    /// Built-in profile for a connection type.
    pub fn for_connection(connection_type: ConnectionType) -> Self {
        match connection_type {
            ConnectionType::Usb => Self {
                ceiling_bps: 80_000_000,
                floor_bps: 5_000_000,
                default_bps: 50_000_000,
                step_bps: 4_000_000,
                latency_threshold_ms: 20.0,
                ladder: WIRED_LADDER,
            },
            ConnectionType::Ethernet => Self {
                ceiling_bps: 60_000_000,
                floor_bps: 4_000_000,
                default_bps: 40_000_000,
                step_bps: 3_000_000,
                latency_threshold_ms: 25.0,
                ladder: WIRED_LADDER,
            },
            ConnectionType::WiFi6 => Self {
                ceiling_bps: 40_000_000,
                floor_bps: 2_000_000,
                default_bps: 25_000_000,
                step_bps: 2_000_000,
                latency_threshold_ms: 40.0,
                ladder: WIFI6_LADDER,
            },
            ConnectionType::WiFi5 => Self {
                ceiling_bps: 25_000_000,
                floor_bps: 1_500_000,
                default_bps: 15_000_000,
                step_bps: 1_000_000,
                latency_threshold_ms: 60.0,
                ladder: WIFI5_LADDER,
            },
            ConnectionType::WiFi4 | ConnectionType::Unknown => Self {
                ceiling_bps: 10_000_000,
                floor_bps: 1_000_000,
                default_bps: 6_000_000,
                step_bps: 500_000,
                latency_threshold_ms: 80.0,
                ladder: WIFI4_LADDER,
            },
        }
    }

    /// Tier at `rung`, clamped to the lowest rung.
    pub fn tier(&self, rung: usize) -> QualityTier {
        self.ladder[rung.min(self.lowest_rung())]
    }

    pub fn lowest_rung(&self) -> usize {
        self.ladder.len() - 1
    }

    pub fn clamp_bitrate(&self, bitrate: u32) -> u32 {
        bitrate.clamp(self.floor_bps, self.ceiling_bps)
    }

    /// Apply configured overrides, keeping `floor <= default <= ceiling`.
    pub fn with_override(mut self, o: &ProfileOverride) -> Self {
        if let Some(ceiling) = o.ceiling_bps {
            self.ceiling_bps = ceiling.max(1);
        }
        if let Some(floor) = o.floor_bps {
            self.floor_bps = floor.max(1);
        }
        if self.floor_bps > self.ceiling_bps {
            self.floor_bps = self.ceiling_bps;
        }
        if let Some(threshold) = o.latency_threshold_ms {
            self.latency_threshold_ms = threshold.max(1.0);
        }
        self.default_bps = self.clamp_bitrate(self.default_bps);
        self
    }
}

// ── Overrides ────────────────────────────────────────────────────

/// Configured adjustments to a built-in profile.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOverride {
    pub ceiling_bps: Option<u32>,
    pub floor_bps: Option<u32>,
    pub latency_threshold_ms: Option<f64>,
}

// ── ProfileTable ─────────────────────────────────────────────────

/// Resolved profiles for every connection type.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileTable {
    profiles: [QualityProfile; 6],
}

impl ProfileTable {
    pub fn new(overrides: &BTreeMap<ConnectionType, ProfileOverride>) -> Self {
        let resolve = |ct: ConnectionType| {
            let base = QualityProfile::for_connection(ct);
            match overrides.get(&ct) {
                Some(o) => base.with_override(o),
                None => base,
            }
        };
        Self {
            profiles: ConnectionType::ALL.map(resolve),
        }
    }

    pub fn get(&self, connection_type: ConnectionType) -> &QualityProfile {
        &self.profiles[Self::slot(connection_type)]
    }

    const fn slot(connection_type: ConnectionType) -> usize {
        match connection_type {
            ConnectionType::Usb => 0,
            ConnectionType::Ethernet => 1,
            ConnectionType::WiFi6 => 2,
            ConnectionType::WiFi5 => 3,
            ConnectionType::WiFi4 => 4,
            ConnectionType::Unknown => 5,
        }
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceilings_descend_from_wired_to_wifi4() {
        let ceiling = |ct| QualityProfile::for_connection(ct).ceiling_bps;
        assert!(ceiling(ConnectionType::Usb) >= ceiling(ConnectionType::Ethernet));
        assert!(ceiling(ConnectionType::Ethernet) > ceiling(ConnectionType::WiFi6));
        assert!(ceiling(ConnectionType::WiFi6) > ceiling(ConnectionType::WiFi5));
        assert!(ceiling(ConnectionType::WiFi5) > ceiling(ConnectionType::WiFi4));
    }

    #[test]
    fn every_profile_is_consistent() {
        for ct in ConnectionType::ALL {
            let p = QualityProfile::for_connection(ct);
            assert!(p.floor_bps < p.default_bps, "{ct}");
            assert!(p.default_bps <= p.ceiling_bps, "{ct}");
            assert!(!p.ladder.is_empty(), "{ct}");
            for pair in p.ladder.windows(2) {
                let better = pair[0].resolution.pixels() * pair[0].frame_rate as u64;
                let worse = pair[1].resolution.pixels() * pair[1].frame_rate as u64;
                assert!(better > worse, "{ct} ladder not descending");
            }
        }
    }

    #[test]
    fn tier_clamps_to_lowest() {
        let p = QualityProfile::for_connection(ConnectionType::WiFi5);
        assert_eq!(p.tier(99), p.ladder[p.lowest_rung()]);
    }

    #[test]
    fn override_keeps_bounds_ordered() {
        let p = QualityProfile::for_connection(ConnectionType::WiFi4).with_override(&ProfileOverride {
            ceiling_bps: Some(4_000_000),
            floor_bps: Some(8_000_000),
            latency_threshold_ms: None,
        });
        assert_eq!(p.ceiling_bps, 4_000_000);
        assert_eq!(p.floor_bps, 4_000_000);
        assert_eq!(p.default_bps, 4_000_000);
    }

    #[test]
    fn table_applies_overrides_per_type() {
        let overrides = BTreeMap::from([(
            ConnectionType::WiFi6,
            ProfileOverride {
                ceiling_bps: Some(30_000_000),
                ..Default::default()
            },
        )]);
        let table = ProfileTable::new(&overrides);
        assert_eq!(table.get(ConnectionType::WiFi6).ceiling_bps, 30_000_000);
        assert_eq!(table.get(ConnectionType::WiFi5).ceiling_bps, 25_000_000);
    }
}
