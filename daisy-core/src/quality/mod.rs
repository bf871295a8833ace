//! Adaptive quality control.
//!
//! ## Sub-modules
//!
//! | Module    | Purpose                                                  |
//! |-----------|----------------------------------------------------------|
//! | `profile` | Per-connection-type bitrate bounds and resolution ladder |
//! | `adapter` | Pure AIMD decision function over smoothed telemetry      |

pub mod adapter;
pub mod profile;

pub use adapter::{Adaptation, AdaptationHistory, AdapterConfig, Decision, QualityAdapter};
pub use profile::{ProfileOverride, ProfileTable, QualityProfile, QualityTier};
