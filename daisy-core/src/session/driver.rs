//! Per-session driver task.
//!
//! Owns the transport connection for one session and turns everything
//! that happens to it (handshake results, counter samples, timeouts,
//! caller commands, cancellation) into [`SessionEvent`]s applied through
//! the registry. The registry state is re-read at the top of every step,
//! so a transition made elsewhere (the reaper, an eviction) is picked up
//! on the next iteration.
//!
//! ```text
//!  connecting ── open_connection ──► connected ── negotiate ──► streaming
//!       │ timeout / error                │                         │ sample loop
//!       ▼                                ▼                         ▼
//!     error ◄────────────────────────────┴─────────────────────────┘
//!       │ reconnect / backoff            teardown ──► disconnecting ── close ──► disconnected
//!       └──► connecting
//! ```

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::DaisyError;
use crate::model::{ConnectionType, SessionId, SessionState, StreamQuality};
use crate::ports::{MediaPipeline, Transport};
use crate::session::machine::{FailureKind, SessionEvent, Transition};
use crate::session::registry::SessionRegistry;
use crate::task::{CommandReceiver, SessionCommand};
use crate::telemetry::{CounterDelta, RawCounters, TelemetrySampler};

/// Shared collaborators handed to every driver.
#[derive(Clone)]
pub struct DriverDeps {
    pub registry: Arc<SessionRegistry>,
    pub transport: Arc<dyn Transport>,
    pub pipeline: Arc<dyn MediaPipeline>,
    pub config: DriverConfig,
}

struct LiveLink {
    sampler: TelemetrySampler,
    counters: BoxStream<'static, RawCounters>,
}

enum Wake {
    Cancelled,
    Command(Option<SessionCommand>),
    Counters(Option<RawCounters>),
    TimedOut,
}

// ── SessionDriver ────────────────────────────────────────────────

pub struct SessionDriver {
    session: SessionId,
    connection_type: ConnectionType,
    deps: DriverDeps,
    cancel: CancellationToken,
    commands: CommandReceiver,
    commands_open: bool,
    live: Option<LiveLink>,
}

impl SessionDriver {
    pub fn new(
        session: SessionId,
        connection_type: ConnectionType,
        deps: DriverDeps,
        cancel: CancellationToken,
        commands: CommandReceiver,
    ) -> Self {
        Self {
            session,
            connection_type,
            deps,
            cancel,
            commands,
            commands_open: true,
            live: None,
        }
    }

    /// Drive the session until it is `disconnected` or gone.
    pub async fn run(mut self) -> Result<(), DaisyError> {
        info!(session = %self.session, connection_type = %self.connection_type, "session driver started");

        loop {
            let state = match self.deps.registry.get(&self.session) {
                Ok(session) => session.state,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            };
            match state {
                SessionState::Connecting => self.connect().await?,
                SessionState::Connected => self.negotiate().await?,
                SessionState::Streaming => self.stream().await?,
                SessionState::Disconnecting => self.drain().await?,
                SessionState::Error => self.recover().await?,
                SessionState::Disconnected => break,
            }
        }

        self.close_link().await;
        info!(session = %self.session, "session driver stopped");
        Ok(())
    }

    // ── States ───────────────────────────────────────────────────

    async fn connect(&mut self) -> Result<(), DaisyError> {
        let open = tokio::time::timeout(
            self.deps.config.handshake_timeout,
            self.deps
                .transport
                .open_connection(&self.session, self.connection_type),
        );
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = open => Some(r),
        };

        match result {
            None => {
                self.apply(SessionEvent::Failure(FailureKind::Cancelled))?;
                self.apply(SessionEvent::Abandon)?;
            }
            Some(Err(_)) => {
                warn!(session = %self.session, timeout = ?self.deps.config.handshake_timeout, "handshake timed out");
                self.apply(SessionEvent::Failure(FailureKind::HandshakeTimeout))?;
            }
            Some(Ok(Err(e))) => {
                warn!(session = %self.session, error = %e, "transport open failed");
                self.apply(SessionEvent::Failure(FailureKind::TransportFailure))?;
            }
            Some(Ok(Ok(handshake))) => {
                let mut sampler = TelemetrySampler::new(self.connection_type, handshake.link);
                sampler.seed_frames(self.deps.pipeline.frames_sent(&self.session));
                self.live = Some(LiveLink {
                    sampler,
                    counters: handshake.counters,
                });
                if self.apply(SessionEvent::HandshakeComplete)?.is_none() {
                    self.close_link().await;
                }
            }
        }
        Ok(())
    }

    async fn negotiate(&mut self) -> Result<(), DaisyError> {
        if self.live.is_none() {
            self.apply(SessionEvent::Failure(FailureKind::TransportClosed))?;
            return Ok(());
        }

        let negotiate = tokio::time::timeout(
            self.deps.config.handshake_timeout,
            self.deps
                .pipeline
                .negotiate(&self.session, self.connection_type),
        );
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = negotiate => Some(r),
        };

        match result {
            None => {
                self.apply(SessionEvent::Teardown)?;
            }
            Some(Ok(Ok(codec))) => {
                if let Some(tr) = self.apply(SessionEvent::MediaNegotiated { codec })? {
                    self.push_quality(&tr).await?;
                }
            }
            Some(Ok(Err(e))) => {
                warn!(session = %self.session, error = %e, "media negotiation failed");
                self.close_link().await;
                self.apply(SessionEvent::Failure(FailureKind::TransportFailure))?;
            }
            Some(Err(_)) => {
                warn!(session = %self.session, "media negotiation timed out");
                self.close_link().await;
                self.apply(SessionEvent::Failure(FailureKind::HandshakeTimeout))?;
            }
        }
        Ok(())
    }

    async fn stream(&mut self) -> Result<(), DaisyError> {
        let telemetry_timeout = self.deps.config.telemetry_timeout;
        let mut sample_deadline = Instant::now() + telemetry_timeout;
        loop {
            let Some(live) = self.live.as_mut() else {
                self.apply(SessionEvent::Failure(FailureKind::TransportClosed))?;
                return Ok(());
            };

            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                cmd = self.commands.recv(), if self.commands_open => Wake::Command(cmd),
                next = live.counters.next() => Wake::Counters(next),
                _ = sleep_until(sample_deadline) => Wake::TimedOut,
            };

            match wake {
                Wake::Cancelled => {
                    debug!(session = %self.session, "cancelled while streaming");
                    self.apply(SessionEvent::Teardown)?;
                    return Ok(());
                }
                Wake::Command(None) => {
                    self.commands_open = false;
                    self.apply(SessionEvent::Teardown)?;
                    return Ok(());
                }
                Wake::Command(Some(SessionCommand::Teardown)) => {
                    self.apply(SessionEvent::Teardown)?;
                    return Ok(());
                }
                Wake::Command(Some(SessionCommand::Reconnect)) => {
                    debug!(session = %self.session, "reconnect ignored while streaming");
                }
                Wake::Command(Some(SessionCommand::Renegotiate(codec))) => {
                    match self.apply(SessionEvent::Renegotiate { codec })? {
                        Some(tr) => self.push_quality(&tr).await?,
                        None => return Ok(()),
                    }
                }
                Wake::Counters(Some(counters)) => {
                    sample_deadline = Instant::now() + telemetry_timeout;
                    if !self.on_counters(counters).await? {
                        return Ok(());
                    }
                }
                Wake::Counters(None) => {
                    warn!(session = %self.session, "transport closed");
                    self.close_link().await;
                    self.apply(SessionEvent::Failure(FailureKind::TransportClosed))?;
                    return Ok(());
                }
                Wake::TimedOut => {
                    warn!(session = %self.session, timeout = ?telemetry_timeout, "no telemetry");
                    self.close_link().await;
                    self.apply(SessionEvent::Failure(FailureKind::TelemetryTimeout))?;
                    return Ok(());
                }
            }

            if self.state()? != Some(SessionState::Streaming) {
                return Ok(());
            }
        }
    }

    /// Close the connection and fold its final counters.
    async fn drain(&mut self) -> Result<(), DaisyError> {
        let delta = self.release().await;
        self.apply(SessionEvent::Drained(delta))?;
        Ok(())
    }

    /// Wait in `error` for a reconnect, an automatic retry, or the window
    /// to close.
    async fn recover(&mut self) -> Result<(), DaisyError> {
        self.close_link().await;

        let retries = match self.deps.registry.get(&self.session) {
            Ok(session) => session.retries,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let start = Instant::now();
        let deadline = start + self.deps.registry.config().reconnect_window;
        let retry_at = self
            .deps
            .config
            .auto_reconnect
            .then(|| start + self.deps.config.backoff_for(retries));

        let event = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SessionEvent::Abandon,
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(SessionCommand::Reconnect) => break SessionEvent::Reconnect,
                    Some(SessionCommand::Teardown) => break SessionEvent::Abandon,
                    Some(SessionCommand::Renegotiate(_)) => continue,
                    None => {
                        self.commands_open = false;
                        break SessionEvent::Abandon;
                    }
                },
                _ = sleep_until(retry_at.unwrap_or(deadline)), if retry_at.is_some() => {
                    break SessionEvent::Reconnect;
                }
                _ = sleep_until(deadline) => break SessionEvent::Abandon,
            }
        };

        match event {
            SessionEvent::Reconnect => debug!(session = %self.session, retries, "reconnecting"),
            _ => info!(session = %self.session, retries, "abandoning session"),
        }
        self.apply(event)?;
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Feed one counter reading through the sampler and the state machine.
    /// Returns `false` once the session has left `streaming`.
    async fn on_counters(&mut self, counters: RawCounters) -> Result<bool, DaisyError> {
        let frames = self.deps.pipeline.frames_sent(&self.session);
        let Some(live) = self.live.as_mut() else {
            return Ok(false);
        };
        let sample = live.sampler.ingest(counters, frames);

        match self.apply(SessionEvent::Telemetry(sample))? {
            Some(tr) if tr.to == SessionState::Streaming => {
                self.push_quality(&tr).await?;
                Ok(true)
            }
            Some(_) => {
                self.close_link().await;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Hand a changed quality to the media pipeline.
    async fn push_quality(&mut self, transition: &Transition) -> Result<(), DaisyError> {
        let Some(quality) = transition.quality_changed else {
            return Ok(());
        };
        if let Err(e) = self.apply_quality(&quality).await {
            warn!(session = %self.session, error = %e, "failed to apply quality");
            self.close_link().await;
            self.apply(SessionEvent::Failure(FailureKind::TransportFailure))?;
        }
        Ok(())
    }

    async fn apply_quality(&mut self, quality: &StreamQuality) -> Result<(), DaisyError> {
        let timeout = self.deps.config.telemetry_timeout;
        tokio::time::timeout(timeout, self.deps.pipeline.apply_quality(&self.session, quality))
            .await
            .map_err(|_| DaisyError::Timeout(timeout))?
    }

    /// Close the connection outside a drain and record its final counter
    /// growth on the session.
    async fn close_link(&mut self) {
        let delta = self.release().await;
        if delta.is_zero() {
            return;
        }
        if let Err(e) = self.deps.registry.record_counters(&self.session, &delta) {
            debug!(session = %self.session, error = %e, "final counters not recorded");
        }
    }

    /// Close the transport connection if one is open, returning the
    /// counter growth since the last sample.
    async fn release(&mut self) -> CounterDelta {
        let Some(mut live) = self.live.take() else {
            return CounterDelta::default();
        };
        let timeout = self.deps.config.teardown_timeout;
        match tokio::time::timeout(timeout, self.deps.transport.close_connection(&self.session)).await {
            Ok(Ok(counters)) => {
                let frames = self.deps.pipeline.frames_sent(&self.session);
                live.sampler.finish(counters, frames)
            }
            Ok(Err(e)) => {
                warn!(session = %self.session, error = %e, "close failed");
                CounterDelta::default()
            }
            Err(_) => {
                warn!(session = %self.session, timeout = ?timeout, "close timed out");
                CounterDelta::default()
            }
        }
    }

    /// Apply an event. A rejected or orphaned event means someone else
    /// moved the session; the next loop iteration re-reads its state.
    fn apply(&self, event: SessionEvent) -> Result<Option<Transition>, DaisyError> {
        match self.deps.registry.transition(&self.session, event) {
            Ok(tr) => Ok(Some(tr)),
            Err(e @ DaisyError::InvalidTransition { .. }) => {
                debug!(session = %self.session, "{e}");
                Ok(None)
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn state(&self) -> Result<Option<SessionState>, DaisyError> {
        match self.deps.registry.get(&self.session) {
            Ok(session) => Ok(Some(session.state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
