//! Quality adapter: the per-sample decision function.
//!
//! Pure logic only. Given the current quality, one telemetry snapshot and
//! the adaptation history, it returns the next complete
//! [`StreamQuality`] together with the updated history. No I/O, no
//! logging, no clocks.
//!
//! Policy (AIMD):
//!
//! - Latency and loss are smoothed with an EWMA.
//! - Bad conditions halve the bitrate immediately, down to the floor.
//! - A full window of good samples adds one fixed step, up to the ceiling.
//! - Resolution / frame rate step down one rung only after the bitrate
//!   sits at the floor for another full window of bad samples, and step
//!   back up only once the bitrate is close to the ceiling again.
//! - The codec is never touched.

use crate::model::{Codec, ConnectionInfo, ConnectionType, StreamQuality};
use crate::quality::profile::{ProfileTable, QualityProfile};

// ── AdapterConfig ────────────────────────────────────────────────

/// Thresholds and window sizes for the adapter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdapterConfig {
    /// Weight of the newest sample in the EWMA (0..=1).
    pub ewma_weight: f64,
    /// Loss percentage above which conditions are bad.
    pub loss_high_water: f64,
    /// Loss percentage below which conditions may be good.
    pub loss_low_water: f64,
    /// Fraction of the latency threshold below which conditions may be good.
    pub latency_low_fraction: f64,
    /// Consecutive good samples required for one increase step.
    pub good_window: u32,
    /// Consecutive bad samples at the floor required for a downgrade.
    pub poor_window: u32,
    /// Fraction of the ceiling the bitrate must reach before upgrading.
    pub restore_fraction: f64,
    /// Consecutive zero-throughput samples that count as a stall.
    pub stall_window: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            ewma_weight: 0.7,
            loss_high_water: 5.0,
            loss_low_water: 1.0,
            latency_low_fraction: 0.5,
            good_window: 5,
            poor_window: 5,
            restore_fraction: 0.9,
            stall_window: 5,
        }
    }
}

// ── History / output ─────────────────────────────────────────────

/// Rolling state carried between adaptation steps for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptationHistory {
    latency_ewma: Option<f64>,
    loss_ewma: Option<f64>,
    good_streak: u32,
    poor_streak: u32,
    stall_streak: u32,
    rung: usize,
}

impl AdaptationHistory {
    /// Smoothed latency in milliseconds, once a sample has been seen.
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ewma
    }

    /// Smoothed loss percentage, once a sample has been seen.
    pub fn loss_percent(&self) -> Option<f64> {
        self.loss_ewma
    }

    /// Current ladder rung (0 = best tier).
    pub fn rung(&self) -> usize {
        self.rung
    }
}

/// What the adapter did on one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    DecreaseBitrate,
    IncreaseBitrate,
    Downgrade,
    Upgrade,
}

impl Decision {
    /// Whether the quality differs from the input.
    pub fn changes_quality(self) -> bool {
        !matches!(self, Decision::Hold)
    }
}

/// Result of one adaptation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Adaptation {
    pub quality: StreamQuality,
    pub history: AdaptationHistory,
    pub decision: Decision,
    /// Throughput has been zero for a full stall window.
    pub stalled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conditions {
    Good,
    Bad,
    Neutral,
}

// ── QualityAdapter ───────────────────────────────────────────────

/// Computes target quality from telemetry.
#[derive(Debug, Clone)]
pub struct QualityAdapter {
    config: AdapterConfig,
    profiles: ProfileTable,
}

impl QualityAdapter {
    pub fn new(config: AdapterConfig, profiles: ProfileTable) -> Self {
        Self { config, profiles }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn profile(&self, connection_type: ConnectionType) -> &QualityProfile {
        self.profiles.get(connection_type)
    }

    /// Starting quality for a fresh `streaming` entry.
    pub fn initial_quality(&self, connection_type: ConnectionType, codec: Codec) -> StreamQuality {
        let profile = self.profile(connection_type);
        let top = profile.tier(0);
        StreamQuality {
            resolution: top.resolution,
            frame_rate: top.frame_rate,
            bitrate: profile.default_bps,
            codec,
        }
    }

    /// One adaptation step.
    pub fn adapt(
        &self,
        connection_type: ConnectionType,
        current: &StreamQuality,
        sample: &ConnectionInfo,
        history: &AdaptationHistory,
    ) -> Adaptation {
        let cfg = &self.config;
        let profile = self.profile(connection_type);
        let weight = cfg.ewma_weight.clamp(0.0, 1.0);

        let mut next = history.clone();
        let latency = ewma(history.latency_ewma, sample.latency_ms, weight);
        let loss = ewma(history.loss_ewma, sample.packet_loss_percent, weight);
        next.latency_ewma = Some(latency);
        next.loss_ewma = Some(loss);

        next.stall_streak = if sample.bandwidth_bps == 0 {
            history.stall_streak.saturating_add(1)
        } else {
            0
        };
        let stalled = next.stall_streak >= cfg.stall_window.max(1);

        let conditions = if loss > cfg.loss_high_water || latency > profile.latency_threshold_ms {
            Conditions::Bad
        } else if loss < cfg.loss_low_water
            && latency < profile.latency_threshold_ms * cfg.latency_low_fraction
        {
            Conditions::Good
        } else {
            Conditions::Neutral
        };

        next.rung = history.rung.min(profile.lowest_rung());
        let mut bitrate = profile.clamp_bitrate(current.bitrate);
        let mut decision = Decision::Hold;

        match conditions {
            Conditions::Bad => {
                next.good_streak = 0;
                if bitrate > profile.floor_bps {
                    bitrate = (bitrate / 2).max(profile.floor_bps);
                    next.poor_streak = 0;
                    decision = Decision::DecreaseBitrate;
                } else {
                    next.poor_streak = history.poor_streak.saturating_add(1);
                    if next.poor_streak >= cfg.poor_window.max(1) && next.rung < profile.lowest_rung() {
                        next.rung += 1;
                        next.poor_streak = 0;
                        decision = Decision::Downgrade;
                    }
                }
            }
            Conditions::Good => {
                next.poor_streak = 0;
                next.good_streak = history.good_streak.saturating_add(1);
                if next.good_streak >= cfg.good_window.max(1) {
                    next.good_streak = 0;
                    let restored = bitrate as f64 >= profile.ceiling_bps as f64 * cfg.restore_fraction;
                    if next.rung > 0 && restored {
                        next.rung -= 1;
                        decision = Decision::Upgrade;
                    } else if bitrate < profile.ceiling_bps {
                        bitrate = bitrate.saturating_add(profile.step_bps).min(profile.ceiling_bps);
                        decision = Decision::IncreaseBitrate;
                    }
                }
            }
            Conditions::Neutral => {
                next.good_streak = 0;
                next.poor_streak = 0;
            }
        }

        let tier = profile.tier(next.rung);
        let quality = StreamQuality {
            resolution: tier.resolution,
            frame_rate: tier.frame_rate,
            bitrate,
            codec: current.codec,
        };
        if decision == Decision::Hold && quality != *current {
            // Input was out of bounds for the profile; the clamp is a change.
            decision = if quality.bitrate < current.bitrate {
                Decision::DecreaseBitrate
            } else {
                Decision::IncreaseBitrate
            };
        }

        Adaptation {
            quality,
            history: next,
            decision,
            stalled,
        }
    }
}

impl Default for QualityAdapter {
    fn default() -> Self {
        Self::new(AdapterConfig::default(), ProfileTable::default())
    }
}

fn ewma(previous: Option<f64>, sample: f64, weight: f64) -> f64 {
    match previous {
        Some(avg) => weight * sample + (1.0 - weight) * avg,
        None => sample,
    }
}

// ── Tests ────────────────────────────────────────────────────────
