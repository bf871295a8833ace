//! Concurrent session store.
//!
//! The map is guarded by a `parking_lot::RwLock`; each entry sits behind
//! its own `Mutex`. Lock order is always map first, then entry, so two
//! sessions never contend on anything but the brief map read.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::DaisyError;
use crate::model::{ClientId, ConnectionType, Session, SessionId, SessionState};
use crate::quality::QualityAdapter;
use crate::session::machine::{FailureKind, SessionEvent, SessionMachine, Transition, elapsed};
use crate::telemetry::CounterDelta;

type Entry = Arc<Mutex<SessionMachine>>;

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Entry>,
    by_client: HashMap<ClientId, SessionId>,
}

/// What one reaper sweep did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReapReport {
    /// Sessions moved to `error` for inactivity.
    pub failed: Vec<SessionId>,
    /// Sessions abandoned from `error` and evicted, as last seen.
    pub abandoned: Vec<Session>,
    /// `disconnected` sessions evicted after the retention window.
    pub evicted: Vec<SessionId>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty() && self.evicted.is_empty()
    }
}

// ── SessionRegistry ──────────────────────────────────────────────

/// Owns every [`Session`] and serializes changes per session.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    adapter: Arc<QualityAdapter>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, adapter: Arc<QualityAdapter>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            adapter,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start a new session for `client_id` in `connecting`.
    pub fn create(
        &self,
        client_id: ClientId,
        connection_type: ConnectionType,
    ) -> Result<SessionId, DaisyError> {
        self.create_at(client_id, connection_type, Utc::now())
    }

    pub fn create_at(
        &self,
        client_id: ClientId,
        connection_type: ConnectionType,
        now: DateTime<Utc>,
    ) -> Result<SessionId, DaisyError> {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.by_client.get(&client_id) {
            let active = inner
                .sessions
                .get(existing)
                .is_some_and(|entry| entry.lock().state().is_active());
            if active {
                return Err(DaisyError::DuplicateClient(client_id));
            }
        }

        let mut id = SessionId::generate();
        while inner.sessions.contains_key(&id) {
            id = SessionId::generate();
        }

        let session = Session::new(id.clone(), client_id.clone(), connection_type, now);
        let machine = SessionMachine::new(session, self.adapter.clone(), self.config);
        inner.sessions.insert(id.clone(), Arc::new(Mutex::new(machine)));
        inner.by_client.insert(client_id.clone(), id.clone());

        info!(session = %id, client = %client_id, %connection_type, "session created");
        Ok(id)
    }

    /// Snapshot of one session.
    pub fn get(&self, id: &SessionId) -> Result<Session, DaisyError> {
        let entry = self.entry(id)?;
        let machine = entry.lock();
        Ok(machine.session().clone())
    }

    /// Snapshot of every non-terminal session.
    ///
    /// The map read lock is held for the whole enumeration so no session
    /// can be created or evicted part way through.
    pub fn list_active(&self) -> Vec<Session> {
        let inner = self.inner.read();
        let mut out: Vec<Session> = inner
            .sessions
            .values()
            .filter_map(|entry| {
                let machine = entry.lock();
                machine.state().is_active().then(|| machine.session().clone())
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Snapshot of every session, terminal ones included.
    pub fn list(&self) -> Vec<Session> {
        let inner = self.inner.read();
        inner
            .sessions
            .values()
            .map(|entry| entry.lock().session().clone())
            .collect()
    }

    pub fn transition(&self, id: &SessionId, event: SessionEvent) -> Result<Transition, DaisyError> {
        self.transition_at(id, event, Utc::now())
    }

    pub fn transition_at(
        &self,
        id: &SessionId,
        event: SessionEvent,
        now: DateTime<Utc>,
    ) -> Result<Transition, DaisyError> {
        let entry = self.entry(id)?;
        let mut machine = entry.lock();
        machine.apply(event, now)
    }

    /// Refresh `last_active` on a live session.
    pub fn heartbeat(&self, id: &SessionId) -> Result<(), DaisyError> {
        self.heartbeat_at(id, Utc::now())
    }

    pub fn heartbeat_at(&self, id: &SessionId, now: DateTime<Utc>) -> Result<(), DaisyError> {
        let entry = self.entry(id)?;
        let mut machine = entry.lock();
        machine.heartbeat(now)
    }

    /// Add counter growth observed outside a telemetry sample or drain.
    pub fn record_counters(&self, id: &SessionId, delta: &CounterDelta) -> Result<(), DaisyError> {
        let entry = self.entry(id)?;
        entry.lock().record_counters(delta);
        Ok(())
    }

    /// Remove a session regardless of state.
    pub fn evict(&self, id: &SessionId) -> Result<Session, DaisyError> {
        let mut inner = self.inner.write();
        let entry = inner
            .sessions
            .remove(id)
            .ok_or_else(|| DaisyError::session_not_found(id))?;
        let session = entry.lock().session().clone();
        if inner.by_client.get(&session.client_id) == Some(id) {
            inner.by_client.remove(&session.client_id);
        }
        if session.state.is_active() {
            warn!(session = %id, state = %session.state, "evicted an active session");
        } else {
            debug!(session = %id, "session evicted");
        }
        Ok(session)
    }

    /// Whether the client owns a non-terminal session.
    pub fn has_active(&self, client_id: &ClientId) -> bool {
        self.active_for(client_id).is_some()
    }

    /// Active session owned by `client_id`, if any.
    pub fn active_for(&self, client_id: &ClientId) -> Option<SessionId> {
        let inner = self.inner.read();
        let id = inner.by_client.get(client_id)?;
        let entry = inner.sessions.get(id)?;
        entry.lock().state().is_active().then(|| id.clone())
    }

    pub fn active_count(&self) -> usize {
        let inner = self.inner.read();
        inner
            .sessions
            .values()
            .filter(|entry| entry.lock().state().is_active())
            .count()
    }

    /// Sessions that have sat in `error` for longer than `threshold`.
    pub fn stuck_in_error(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<SessionId> {
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .filter(|(_, entry)| {
                let machine = entry.lock();
                machine.state() == SessionState::Error
                    && machine.errored_at().is_some_and(|at| elapsed(at, now) > threshold)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn reap(&self) -> ReapReport {
        self.reap_at(Utc::now())
    }

    /// One maintenance sweep at `now`.
    pub fn reap_at(&self, now: DateTime<Utc>) -> ReapReport {
        let entries: Vec<(SessionId, Entry)> = {
            let inner = self.inner.read();
            inner
                .sessions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        };

        let mut report = ReapReport::default();
        let mut to_evict = Vec::new();

        for (id, entry) in entries {
            let mut machine = entry.lock();
            match machine.state() {
                SessionState::Disconnected => {
                    let ended = machine.ended_at().unwrap_or(machine.session().last_active);
                    if elapsed(ended, now) > self.config.retention {
                        to_evict.push(id);
                    }
                }
                SessionState::Error => {
                    if machine.reconnect_window_elapsed(now)
                        && machine.apply(SessionEvent::Abandon, now).is_ok()
                    {
                        report.abandoned.push(machine.session().clone());
                        to_evict.push(id);
                    }
                }
                _ => {
                    let idle = elapsed(machine.session().last_active, now);
                    if idle > self.config.idle_timeout
                        && machine
                            .apply(SessionEvent::Failure(FailureKind::IdleTimeout), now)
                            .is_ok()
                    {
                        report.failed.push(id);
                    }
                }
            }
        }

        for id in to_evict {
            if self.evict(&id).is_ok() && !report.abandoned.iter().any(|s| s.id == id) {
                report.evicted.push(id);
            }
        }

        if !report.is_empty() {
            info!(
                failed = report.failed.len(),
                abandoned = report.abandoned.len(),
                evicted = report.evicted.len(),
                "reaper sweep"
            );
        }
        report
    }

    fn entry(&self, id: &SessionId) -> Result<Entry, DaisyError> {
        self.inner
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| DaisyError::session_not_found(id))
    }
}

// ── Tests ────────────────────────────────────────────────────────
