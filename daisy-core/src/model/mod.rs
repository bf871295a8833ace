//! Shared data vocabulary exposed to callers.
//!
//! These are the serialisable shapes read by the outer layers (HTTP, CLI,
//! dashboards). Field names follow the established JSON schema; optional
//! fields are omitted until the session reaches a state that fills them.

pub mod client;
pub mod health;
pub mod link;
pub mod pairing;
pub mod quality;
pub mod session;

pub use client::{ClientInfo, DisplayInfo};
pub use health::{HealthStatus, ServiceHealth};
pub use link::ConnectionInfo;
pub use pairing::{PairingRequest, PairingResponse};
pub use quality::{Codec, Resolution, SessionStats, StreamQuality};
pub use session::{ClientId, ConnectionType, Session, SessionId, SessionState};

/// Serialize a `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
