//! Telemetry sampling.
//!
//! Raw cumulative counters from the transport are turned into normalized
//! [`ConnectionInfo`](crate::model::ConnectionInfo) snapshots plus counter
//! deltas that the state machine folds into
//! [`SessionStats`](crate::model::SessionStats).
//!
//! | Module      | Purpose                                           |
//! |-------------|---------------------------------------------------|
//! | `bandwidth` | Rolling-window throughput estimator                |
//! | `sampler`   | Per-connection counter normalization               |

pub mod bandwidth;
pub mod sampler;

pub use bandwidth::BandwidthEstimator;
pub use sampler::{CounterDelta, LinkInfo, RawCounters, TelemetrySample, TelemetrySampler};
