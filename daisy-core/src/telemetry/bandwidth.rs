//! Bandwidth estimator for adaptive quality control.
//!
//! Tracks bytes delivered over a rolling window together with the
//! interval each sample covers, and derives the current throughput in
//! bytes/second.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling-window bandwidth estimator.
///
/// Records `(timestamp, bytes, interval)` samples and computes the
/// average throughput over the most recent `window` duration.
pub struct BandwidthEstimator {
    /// Samples: `(when, bytes, covered interval)`.
    samples: VecDeque<(Instant, u64, Duration)>,
    /// Window duration.
    window: Duration,
    /// Running total of bytes in the window.
    total_bytes: u64,
    /// Running total of covered time in the window.
    total_span: Duration,
}

impl BandwidthEstimator {
    /// Create an estimator with a 2-second rolling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(2))
    }

    /// Create an estimator with a custom window duration.
    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            total_bytes: 0,
            total_span: Duration::ZERO,
        }
    }

    /// Record that `bytes` were transmitted during the `span` ending at `when`.
    pub fn record_at(&mut self, when: Instant, bytes: u64, span: Duration) {
        self.samples.push_back((when, bytes, span));
        self.total_bytes += bytes;
        self.total_span += span;
        self.evict(when);
    }

    /// Estimated throughput in bytes/second over the rolling window.
    pub fn estimate_bps(&self) -> u64 {
        if self.total_span.is_zero() {
            return 0;
        }
        (self.total_bytes as f64 / self.total_span.as_secs_f64()) as u64
    }

    /// Number of samples currently in the window.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    // ── Internal ─────────────────────────────────────────────────

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes, span)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(bytes);
                self.total_span = self.total_span.saturating_sub(span);
            } else {
                break;
            }
        }
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_estimator_returns_zero() {
        let est = BandwidthEstimator::new();
        assert_eq!(est.estimate_bps(), 0);
    }

    #[test]
    fn single_sample_uses_its_interval() {
        let mut est = BandwidthEstimator::new();
        est.record_at(Instant::now(), 500_000, Duration::from_millis(500));
        assert_eq!(est.estimate_bps(), 1_000_000);
    }

    #[test]
    fn two_samples_one_second_apart() {
        let mut est = BandwidthEstimator::with_window(Duration::from_secs(5));
        let t0 = Instant::now();
        est.record_at(t0, 1_000_000, Duration::from_secs(1));
        est.record_at(t0 + Duration::from_secs(1), 1_000_000, Duration::from_secs(1));
        let bps = est.estimate_bps();
        assert!((900_000..=1_100_000).contains(&bps), "bps = {bps}");
    }

    #[test]
    fn evicts_old_samples() {
        let mut est = BandwidthEstimator::with_window(Duration::from_millis(500));
        let t0 = Instant::now();
        est.record_at(t0, 1000, Duration::from_millis(100));
        est.record_at(t0 + Duration::from_secs(1), 0, Duration::from_millis(100));
        assert_eq!(est.sample_count(), 1);
        assert_eq!(est.estimate_bps(), 0);
    }
}
