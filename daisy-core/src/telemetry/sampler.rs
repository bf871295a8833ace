//! Per-connection counter normalization.
//!
//! The transport reports cumulative counters since the connection was
//! opened. The sampler keeps the previous reading, turns each new one
//! into deltas, and derives loss percentage and throughput.

use std::time::{Duration, Instant};

use crate::model::{ConnectionInfo, ConnectionType};
use crate::telemetry::bandwidth::BandwidthEstimator;

// ── Input / output types ─────────────────────────────────────────

/// Cumulative counters for one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawCounters {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_lost: u64,
    /// Most recent round-trip measurement.
    pub round_trip: Duration,
}

/// Interface details reported by the transport handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub interface_name: String,
    pub ip_address: String,
}

/// Counter growth since the previous sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterDelta {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub packets_lost: u64,
}

impl CounterDelta {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// One normalized sample handed to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub info: ConnectionInfo,
    pub delta: CounterDelta,
}

// ── TelemetrySampler ─────────────────────────────────────────────

/// Converts a stream of cumulative counters into [`TelemetrySample`]s.
pub struct TelemetrySampler {
    connection_type: ConnectionType,
    link: LinkInfo,
    last: Option<RawCounters>,
    last_frames: Option<u64>,
    last_at: Instant,
    bandwidth: BandwidthEstimator,
}

impl TelemetrySampler {
    /// Start sampling a connection that was opened just now.
    pub fn new(connection_type: ConnectionType, link: LinkInfo) -> Self {
        Self::starting_at(connection_type, link, Instant::now())
    }

    /// Start sampling a connection opened at `opened`.
    pub fn starting_at(connection_type: ConnectionType, link: LinkInfo, opened: Instant) -> Self {
        Self {
            connection_type,
            link,
            last: None,
            last_frames: None,
            last_at: opened,
            bandwidth: BandwidthEstimator::new(),
        }
    }

    /// Count frames from `frames_sent` onward. Used when a session
    /// reconnects and the pipeline's frame counter kept running.
    pub fn seed_frames(&mut self, frames_sent: u64) {
        self.last_frames = Some(frames_sent);
    }

    /// Ingest a reading taken now.
    pub fn ingest(&mut self, counters: RawCounters, frames_sent: u64) -> TelemetrySample {
        self.ingest_at(counters, frames_sent, Instant::now())
    }

    /// Ingest a reading taken at `now`.
    pub fn ingest_at(
        &mut self,
        counters: RawCounters,
        frames_sent: u64,
        now: Instant,
    ) -> TelemetrySample {
        let previous = self.last;
        let packets_sent = advance(previous.map(|c| c.packets_sent), counters.packets_sent);
        let delta = self.advance_counters(counters, frames_sent);

        let span = now.saturating_duration_since(self.last_at);
        self.last_at = now;
        self.bandwidth.record_at(now, delta.bytes_sent, span);

        let info = ConnectionInfo {
            connection_type: self.connection_type,
            interface_name: self.link.interface_name.clone(),
            ip_address: self.link.ip_address.clone(),
            latency_ms: counters.round_trip.as_secs_f64() * 1000.0,
            bandwidth_bps: self.bandwidth.estimate_bps().saturating_mul(8),
            packet_loss_percent: loss_percent(packets_sent, delta.packets_lost),
        };

        TelemetrySample { info, delta }
    }

    /// Fold the final counters reported on close; only deltas matter here.
    pub fn finish(&mut self, counters: RawCounters, frames_sent: u64) -> CounterDelta {
        self.advance_counters(counters, frames_sent)
    }

    fn advance_counters(&mut self, counters: RawCounters, frames_sent: u64) -> CounterDelta {
        let previous = self.last.replace(counters);
        let previous_frames = self.last_frames.replace(frames_sent);
        CounterDelta {
            frames_sent: advance(previous_frames, frames_sent),
            bytes_sent: advance(previous.map(|c| c.bytes_sent), counters.bytes_sent),
            packets_lost: advance(previous.map(|c| c.packets_lost), counters.packets_lost),
        }
    }
}

/// Growth of a cumulative counter; a smaller reading means the
/// producer restarted from zero.
fn advance(previous: Option<u64>, current: u64) -> u64 {
    match previous {
        Some(p) if current >= p => current - p,
        _ => current,
    }
}

fn loss_percent(sent: u64, lost: u64) -> f64 {
    match (sent, lost) {
        (_, 0) => 0.0,
        (0, _) => 100.0,
        (sent, lost) => (lost as f64 / sent as f64 * 100.0).min(100.0),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(bytes: u64, sent: u64, lost: u64, rtt_ms: u64) -> RawCounters {
        RawCounters {
            bytes_sent: bytes,
            packets_sent: sent,
            packets_lost: lost,
            round_trip: Duration::from_millis(rtt_ms),
        }
    }

    #[test]
    fn first_reading_is_its_own_delta() {
        let t0 = Instant::now();
        let mut sampler = TelemetrySampler::starting_at(ConnectionType::Usb, LinkInfo::default(), t0);
        let sample = sampler.ingest_at(counters(125_000, 100, 0, 4), 30, t0 + Duration::from_secs(1));
        assert_eq!(sample.delta.bytes_sent, 125_000);
        assert_eq!(sample.delta.frames_sent, 30);
        assert_eq!(sample.info.bandwidth_bps, 1_000_000);
        assert_eq!(sample.info.latency_ms, 4.0);
        assert_eq!(sample.info.packet_loss_percent, 0.0);
    }

    #[test]
    fn deltas_and_loss_between_readings() {
        let t0 = Instant::now();
        let mut sampler = TelemetrySampler::starting_at(ConnectionType::WiFi5, LinkInfo::default(), t0);
        sampler.ingest_at(counters(1000, 100, 0, 10), 10, t0 + Duration::from_millis(500));
        let sample = sampler.ingest_at(counters(3000, 200, 8, 12), 25, t0 + Duration::from_secs(1));
        assert_eq!(sample.delta.bytes_sent, 2000);
        assert_eq!(sample.delta.packets_lost, 8);
        assert_eq!(sample.delta.frames_sent, 15);
        assert!((sample.info.packet_loss_percent - 8.0).abs() < 1e-9);
    }

    #[test]
    fn counter_reset_is_not_negative() {
        let t0 = Instant::now();
        let mut sampler = TelemetrySampler::starting_at(ConnectionType::WiFi6, LinkInfo::default(), t0);
        sampler.ingest_at(counters(10_000, 50, 2, 5), 100, t0 + Duration::from_millis(100));
        let sample = sampler.ingest_at(counters(400, 4, 0, 5), 3, t0 + Duration::from_millis(200));
        assert_eq!(sample.delta.bytes_sent, 400);
        assert_eq!(sample.delta.frames_sent, 3);
        assert_eq!(sample.delta.packets_lost, 0);
    }

    #[test]
    fn idle_link_reports_zero_bandwidth() {
        let t0 = Instant::now();
        let mut sampler = TelemetrySampler::starting_at(ConnectionType::Ethernet, LinkInfo::default(), t0);
        sampler.ingest_at(counters(0, 0, 0, 1), 0, t0 + Duration::from_millis(100));
        let sample = sampler.ingest_at(counters(0, 0, 0, 1), 0, t0 + Duration::from_millis(200));
        assert_eq!(sample.info.bandwidth_bps, 0);
        assert!(sample.delta.is_zero());
    }

    #[test]
    fn finish_reports_trailing_growth() {
        let t0 = Instant::now();
        let mut sampler = TelemetrySampler::starting_at(ConnectionType::Usb, LinkInfo::default(), t0);
        sampler.ingest_at(counters(1000, 10, 0, 1), 5, t0 + Duration::from_millis(100));
        let tail = sampler.finish(counters(1500, 12, 1, 1), 7);
        assert_eq!(tail, CounterDelta { frames_sent: 2, bytes_sent: 500, packets_lost: 1 });
    }

    #[test]
    fn seeded_frames_are_not_recounted() {
        let t0 = Instant::now();
        let mut sampler = TelemetrySampler::starting_at(ConnectionType::Usb, LinkInfo::default(), t0);
        sampler.seed_frames(500);
        let sample = sampler.ingest_at(counters(100, 1, 0, 1), 530, t0 + Duration::from_millis(100));
        assert_eq!(sample.delta.frames_sent, 30);
    }

    #[test]
    fn loss_with_no_packets_sent() {
        assert_eq!(loss_percent(0, 0), 0.0);
        assert_eq!(loss_percent(0, 3), 100.0);
        assert_eq!(loss_percent(10, 20), 100.0);
    }
}
