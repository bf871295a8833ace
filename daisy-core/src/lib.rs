//! # daisy-core
//!
//! Session control plane for Daisy second-screen streaming.
//!
//! This crate contains:
//! - **Model**: `Session`, `StreamQuality`, `SessionStats`, `ClientInfo`, `HealthStatus` and friends
//! - **Quality**: per-link `QualityProfile`s and the pure AIMD `QualityAdapter`
//! - **Telemetry**: `TelemetrySampler` turning cumulative counters into samples
//! - **Session**: validated `SessionMachine`, concurrent `SessionRegistry`, async `SessionDriver`
//! - **Pairing**: `PairingGate` for single-use codes and tokens
//! - **Health**: `HealthAggregator` over the capture-service probe and registry
//! - **Task**: `TaskPool` for per-session driver tasks with cancellation
//! - **Context**: `HostContext`, the process-scoped owner of all of the above
//! - **Error**: `DaisyError`, typed, `thiserror`-based error hierarchy

pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod model;
pub mod pairing;
pub mod ports;
pub mod quality;
pub mod session;
pub mod task;
pub mod telemetry;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{ControllerConfig, DriverConfig, HealthConfig, PairingConfig, RegistryConfig};
pub use context::HostContext;
pub use error::{DaisyError, DenyReason, TaskError};
pub use health::HealthAggregator;
pub use model::{
    ClientId, ClientInfo, Codec, ConnectionInfo, ConnectionType, DisplayInfo, HealthStatus,
    PairingRequest, PairingResponse, Resolution, ServiceHealth, Session, SessionId, SessionState,
    SessionStats, StreamQuality,
};
pub use pairing::PairingGate;
pub use ports::{DependencyProbe, Handshake, MediaPipeline, Transport};
pub use quality::{AdapterConfig, Decision, ProfileOverride, QualityAdapter, QualityProfile};
pub use session::{FailureKind, ReapReport, SessionEvent, SessionRegistry};
pub use task::{SessionCommand, TaskEvent, TaskPool};
pub use telemetry::{CounterDelta, LinkInfo, RawCounters, TelemetrySample, TelemetrySampler};
