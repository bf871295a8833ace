//! Per-session lifecycle state machine.
//!
//! Every change to a [`Session`] goes through [`SessionMachine::apply`],
//! which validates the event against the current state and either applies
//! the whole transition or rejects it with
//! [`DaisyError::InvalidTransition`] leaving the session untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::DaisyError;
use crate::model::{Codec, Session, SessionState, SessionStats, StreamQuality};
use crate::quality::{AdaptationHistory, Decision, QualityAdapter};
use crate::telemetry::{CounterDelta, TelemetrySample};

// ── Events ───────────────────────────────────────────────────────

/// Why a session entered `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    TransportFailure,
    HandshakeTimeout,
    TelemetryTimeout,
    TransportClosed,
    ZeroThroughput,
    IdleTimeout,
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TransportFailure => "transport failure",
            Self::HandshakeTimeout => "handshake timeout",
            Self::TelemetryTimeout => "telemetry timeout",
            Self::TransportClosed => "transport closed",
            Self::ZeroThroughput => "zero throughput",
            Self::IdleTimeout => "idle timeout",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport handshake finished.
    HandshakeComplete,
    /// The media pipeline agreed on a codec.
    MediaNegotiated { codec: Codec },
    /// A normalized telemetry sample while streaming.
    Telemetry(TelemetrySample),
    /// Restart encoding with a (possibly different) codec.
    Renegotiate { codec: Codec },
    Failure(FailureKind),
    /// Try again from `error`.
    Reconnect,
    /// Give up from `error`.
    Abandon,
    /// Begin an orderly shutdown.
    Teardown,
    /// Transport closed; final counter growth attached.
    Drained(CounterDelta),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HandshakeComplete => "handshake_complete",
            Self::MediaNegotiated { .. } => "media_negotiated",
            Self::Telemetry(_) => "telemetry",
            Self::Renegotiate { .. } => "renegotiate",
            Self::Failure(_) => "failure",
            Self::Reconnect => "reconnect",
            Self::Abandon => "abandon",
            Self::Teardown => "teardown",
            Self::Drained(_) => "drained",
        }
    }
}

/// Outcome of an accepted event.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    /// Set when the event replaced the session's quality.
    pub quality_changed: Option<StreamQuality>,
}

// ── SessionMachine ───────────────────────────────────────────────

/// Authoritative session record plus the private state needed to drive it.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    session: Session,
    history: AdaptationHistory,
    errored_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    adapter: Arc<QualityAdapter>,
    limits: RegistryConfig,
}

impl SessionMachine {
    pub fn new(session: Session, adapter: Arc<QualityAdapter>, limits: RegistryConfig) -> Self {
        Self {
            session,
            history: AdaptationHistory::default(),
            errored_at: None,
            ended_at: None,
            adapter,
            limits,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// When the session last entered `error`.
    pub fn errored_at(&self) -> Option<DateTime<Utc>> {
        self.errored_at
    }

    /// When the session reached `disconnected`.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Whether the reconnect window opened at the last error has closed.
    pub fn reconnect_window_elapsed(&self, now: DateTime<Utc>) -> bool {
        match (self.session.state, self.errored_at) {
            (SessionState::Error, Some(at)) => elapsed(at, now) > self.limits.reconnect_window,
            _ => false,
        }
    }

    /// Refresh `last_active` without changing state.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> Result<(), DaisyError> {
        if self.session.state.is_terminal() {
            return Err(self.reject("heartbeat"));
        }
        self.touch(now);
        Ok(())
    }

    /// Fold counter growth reported when a connection closed outside a
    /// drain. Never changes state.
    pub fn record_counters(&mut self, delta: &CounterDelta) {
        if delta.is_zero() {
            return;
        }
        fold(self.session.stats.get_or_insert_with(SessionStats::default), delta);
    }

    /// Apply one event at `now`.
    pub fn apply(&mut self, event: SessionEvent, now: DateTime<Utc>) -> Result<Transition, DaisyError> {
        use SessionState::*;

        let from = self.session.state;
        let mut quality_changed = None;

        let to = match (from, event) {
            (Connecting, SessionEvent::HandshakeComplete) => {
                self.session.connected_at = Some(now);
                Connected
            }
            (Connected, SessionEvent::MediaNegotiated { codec }) => {
                let quality = self.enter_streaming(codec);
                self.session.stats.get_or_insert_with(SessionStats::default).target_bitrate =
                    quality.bitrate;
                quality_changed = Some(quality);
                Streaming
            }
            (Streaming, SessionEvent::Renegotiate { codec }) => {
                let quality = self.enter_streaming(codec);
                if let Some(stats) = self.session.stats.as_mut() {
                    stats.target_bitrate = quality.bitrate;
                }
                quality_changed = Some(quality);
                Streaming
            }
            (Streaming, SessionEvent::Telemetry(sample)) => {
                let (changed, stalled) = self.adapt(&sample);
                quality_changed = changed;
                if stalled {
                    warn!(session = %self.session.id, "sustained zero throughput");
                    self.enter_error(now);
                    Error
                } else {
                    Streaming
                }
            }
            (Connecting | Connected | Streaming | Disconnecting, SessionEvent::Failure(kind)) => {
                warn!(session = %self.session.id, state = %from, reason = %kind, "session failed");
                self.enter_error(now);
                Error
            }
            (Error, SessionEvent::Reconnect) => {
                let within_window = !self.reconnect_window_elapsed(now);
                if self.session.retries < self.limits.max_retries && within_window {
                    self.errored_at = None;
                    Connecting
                } else {
                    info!(
                        session = %self.session.id,
                        retries = self.session.retries,
                        "reconnect refused, giving up"
                    );
                    self.ended_at = Some(now);
                    Disconnected
                }
            }
            (Error, SessionEvent::Abandon) => {
                self.ended_at = Some(now);
                Disconnected
            }
            (Connected | Streaming, SessionEvent::Teardown) => Disconnecting,
            (Disconnecting, SessionEvent::Drained(delta)) => {
                if self.session.stats.is_some() || !delta.is_zero() {
                    fold(self.session.stats.get_or_insert_with(SessionStats::default), &delta);
                }
                self.ended_at = Some(now);
                Disconnected
            }
            (_, event) => return Err(self.reject(event.name())),
        };

        self.session.state = to;
        self.touch(now);
        if from != to {
            info!(session = %self.session.id, %from, %to, "session transition");
        }

        Ok(Transition {
            from,
            to,
            quality_changed,
        })
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn enter_streaming(&mut self, codec: Codec) -> StreamQuality {
        let quality = self
            .adapter
            .initial_quality(self.session.connection_type, codec);
        self.session.quality = Some(quality);
        self.history = AdaptationHistory::default();
        quality
    }

    fn enter_error(&mut self, now: DateTime<Utc>) {
        self.session.retries = self.session.retries.saturating_add(1);
        self.errored_at = Some(now);
    }

    /// Run one adapter step and fold the sample into stats.
    fn adapt(&mut self, sample: &TelemetrySample) -> (Option<StreamQuality>, bool) {
        let connection_type = self.session.connection_type;
        let current = match self.session.quality {
            Some(q) => q,
            None => self.adapter.initial_quality(connection_type, Codec::default()),
        };

        let out = self
            .adapter
            .adapt(connection_type, &current, &sample.info, &self.history);
        self.history = out.history;
        self.session.quality = Some(out.quality);

        let stats = self.session.stats.get_or_insert_with(SessionStats::default);
        fold(stats, &sample.delta);
        stats.average_latency = self.history.latency_ms().unwrap_or(sample.info.latency_ms);
        stats.current_bitrate = sample.info.bandwidth_bps.min(u32::MAX as u64) as u32;
        stats.target_bitrate = out.quality.bitrate;

        if out.decision.changes_quality() {
            debug!(
                session = %self.session.id,
                decision = ?out.decision,
                bitrate = out.quality.bitrate,
                resolution = %out.quality.resolution,
                frame_rate = out.quality.frame_rate,
                "quality adapted"
            );
        }

        let changed = (out.decision != Decision::Hold).then_some(out.quality);
        (changed, out.stalled)
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.session.last_active {
            self.session.last_active = now;
        }
    }

    fn reject(&self, event: &'static str) -> DaisyError {
        DaisyError::InvalidTransition {
            session: self.session.id.clone(),
            from: self.session.state,
            event,
        }
    }
}

fn fold(stats: &mut SessionStats, delta: &CounterDelta) {
    stats.frames_sent = stats.frames_sent.saturating_add(delta.frames_sent);
    stats.bytes_sent = stats.bytes_sent.saturating_add(delta.bytes_sent);
    stats.packets_lost = stats.packets_lost.saturating_add(delta.packets_lost);
}

/// Non-negative wall-clock span between two timestamps.
pub(crate) fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (now - since).to_std().unwrap_or_default()
}

// ── Tests ────────────────────────────────────────────────────────
