//! Collaborator interfaces.
//!
//! The control plane never touches sockets or encoders directly. The host
//! wires in concrete implementations of these traits; tests use in-memory
//! fakes.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DaisyError;
use crate::model::{Codec, ConnectionType, SessionId, StreamQuality};
use crate::telemetry::{LinkInfo, RawCounters};

/// Result of a successful transport handshake.
pub struct Handshake {
    pub link: LinkInfo,
    /// Cumulative counters, one item per sampling tick. Ends when the
    /// connection closes.
    pub counters: BoxStream<'static, RawCounters>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

/// Moves encoded frames between host and client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_connection(
        &self,
        session: &SessionId,
        connection_type: ConnectionType,
    ) -> Result<Handshake, DaisyError>;

    /// Close the connection and return its final cumulative counters.
    async fn close_connection(&self, session: &SessionId) -> Result<RawCounters, DaisyError>;
}

/// Capture and encode pipeline for one session.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    async fn negotiate(
        &self,
        session: &SessionId,
        connection_type: ConnectionType,
    ) -> Result<Codec, DaisyError>;

    async fn apply_quality(
        &self,
        session: &SessionId,
        quality: &StreamQuality,
    ) -> Result<(), DaisyError>;

    /// Frames emitted for this session since the pipeline started it.
    fn frames_sent(&self, session: &SessionId) -> u64;
}

/// Liveness check for the capture service the host depends on.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Round-trip time of one ping. Implementations may ignore `timeout`;
    /// the caller enforces it as well.
    async fn ping(&self, timeout: Duration) -> Result<Duration, DaisyError>;
}
