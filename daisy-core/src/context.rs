//! Process-scoped host context.
//!
//! [`HostContext`] owns the registry, pairing gate, health aggregator and
//! task pool, and is the single entry point callers use. It starts empty
//! (no sessions, no tasks, zeroed counters) and is torn down with
//! [`HostContext::shutdown`].

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::DaisyError;
use crate::health::HealthAggregator;
use crate::model::{
    ClientId, ClientInfo, Codec, ConnectionType, DisplayInfo, HealthStatus, PairingRequest,
    PairingResponse, Session, SessionId, SessionState,
};
use crate::pairing::PairingGate;
use crate::ports::{DependencyProbe, MediaPipeline, Transport};
use crate::quality::QualityAdapter;
use crate::session::{DriverDeps, ReapReport, SessionDriver, SessionRegistry};
use crate::task::{SessionCommand, TaskPool};

pub struct HostContext {
    config: ControllerConfig,
    registry: Arc<SessionRegistry>,
    pairing: PairingGate,
    health: HealthAggregator,
    tasks: Arc<TaskPool>,
    deps: DriverDeps,
    displays: RwLock<Vec<DisplayInfo>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl HostContext {
    /// Build a context and start its task-event loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        pipeline: Arc<dyn MediaPipeline>,
        probe: Arc<dyn DependencyProbe>,
    ) -> Arc<Self> {
        let adapter = Arc::new(QualityAdapter::new(config.adapter, config.profiles()));
        let registry = Arc::new(SessionRegistry::new(config.registry, adapter));
        let tasks = Arc::new(TaskPool::new());

        let event_loop = {
            let tasks = tasks.clone();
            tokio::spawn(async move { tasks.process_events().await })
        };

        let deps = DriverDeps {
            registry: registry.clone(),
            transport,
            pipeline,
            config: config.driver,
        };

        Arc::new(Self {
            pairing: PairingGate::new(config.pairing),
            health: HealthAggregator::new(config.health, probe, config.version.clone()),
            registry,
            tasks,
            deps,
            displays: RwLock::new(Vec::new()),
            event_loop: Mutex::new(Some(event_loop)),
            config,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    // ── Pairing ──────────────────────────────────────────────────

    pub fn issue_pairing_code(&self) -> String {
        self.pairing.issue_code()
    }

    pub fn register_pairing_code(&self, code: impl Into<String>) -> Result<(), DaisyError> {
        self.pairing.register_code(code)
    }

    pub fn authorize(&self, request: &PairingRequest) -> PairingResponse {
        self.pairing.authorize(request)
    }

    // ── Sessions ─────────────────────────────────────────────────

    /// Redeem a pairing token and start streaming to its client.
    pub fn open_session(
        &self,
        token: &str,
        connection_type: ConnectionType,
    ) -> Result<SessionId, DaisyError> {
        if self.tasks.is_shutting_down() {
            return Err(DaisyError::Other("host is shutting down".into()));
        }
        let client = self.pairing.redeem(token)?;
        let id = self.registry.create(client, connection_type)?;

        let deps = self.deps.clone();
        let spawned = self.tasks.spawn(
            id.clone(),
            self.config.driver.command_buffer,
            move |session, cancel, commands| {
                SessionDriver::new(session, connection_type, deps, cancel, commands).run()
            },
        );
        if let Err(e) = spawned {
            let _ = self.registry.evict(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Tear a session down and wait for its driver to finish draining.
    pub async fn close_session(&self, id: &SessionId) -> Result<Session, DaisyError> {
        let session = self.registry.get(id)?;
        let Some(task) = self.tasks.take(id) else {
            return Ok(session);
        };

        match session.state {
            SessionState::Connected | SessionState::Streaming => {
                if task.commands().send(SessionCommand::Teardown).await.is_err() {
                    task.cancel();
                }
            }
            _ => task.cancel(),
        }

        let bound = self.config.driver.teardown_timeout + self.config.driver.handshake_timeout;
        if let Err(e) = task.join(bound).await {
            warn!(session = %id, error = %e, "session driver did not finish cleanly");
        }
        self.registry.get(id)
    }

    /// Ask an errored session to retry now.
    pub async fn reconnect(&self, id: &SessionId) -> Result<(), DaisyError> {
        self.registry.get(id)?;
        self.tasks.send(id, SessionCommand::Reconnect).await
    }

    /// Restart encoding with `codec`.
    pub async fn renegotiate(&self, id: &SessionId, codec: Codec) -> Result<(), DaisyError> {
        self.registry.get(id)?;
        self.tasks.send(id, SessionCommand::Renegotiate(codec)).await
    }

    pub fn heartbeat(&self, id: &SessionId) -> Result<(), DaisyError> {
        self.registry.heartbeat(id)
    }

    pub fn session(&self, id: &SessionId) -> Result<Session, DaisyError> {
        self.registry.get(id)
    }

    /// Active sessions.
    pub fn sessions(&self) -> Vec<Session> {
        self.registry.list_active()
    }

    /// Run `f` whenever a session driver returns.
    pub fn on_session_ended<F>(&self, f: F)
    where
        F: Fn(&SessionId) + Send + Sync + 'static,
    {
        self.tasks.on_task_finished(f);
    }

    // ── Clients / displays ───────────────────────────────────────

    /// Paired clients with `connected` derived from the registry.
    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients = self.pairing.clients();
        for client in &mut clients {
            client.connected = self.registry.has_active(&client.id);
        }
        clients
    }

    pub fn client(&self, id: &ClientId) -> Result<ClientInfo, DaisyError> {
        let mut client = self.pairing.client(id)?;
        client.connected = self.registry.has_active(id);
        Ok(client)
    }

    /// Record device details reported after pairing.
    pub fn update_client(
        &self,
        id: &ClientId,
        update: impl FnOnce(&mut ClientInfo),
    ) -> Result<(), DaisyError> {
        self.pairing.update_client(id, update)
    }

    pub fn displays(&self) -> Vec<DisplayInfo> {
        self.displays.read().clone()
    }

    pub fn set_displays(&self, displays: Vec<DisplayInfo>) {
        debug!(count = displays.len(), "displays updated");
        *self.displays.write() = displays;
    }

    // ── Health / maintenance ─────────────────────────────────────

    pub async fn check_health(&self) -> HealthStatus {
        self.health.check(&self.registry).await
    }

    /// Last known health without pinging the dependency.
    pub fn health(&self) -> HealthStatus {
        self.health.snapshot(&self.registry)
    }

    /// One reaper sweep. Drivers of abandoned sessions are cancelled.
    pub fn reap(&self) -> ReapReport {
        let report = self.registry.reap();
        for session in &report.abandoned {
            self.tasks.cancel(&session.id);
        }
        let pruned = self.pairing.prune();
        if pruned > 0 {
            debug!(pruned, "expired pairing codes and tokens dropped");
        }
        report
    }

    /// Poll health (with backoff) and sweep the registry until `stop`.
    pub async fn run_maintenance(&self, stop: CancellationToken) {
        let reaper_interval = self.config.reaper_interval;
        let mut next_health = Instant::now();
        let mut next_reap = Instant::now() + reaper_interval;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = sleep_until(next_health) => {
                    let status = self.check_health().await;
                    if !status.healthy {
                        debug!(
                            reachable = status.rust_service.reachable,
                            active = status.active_sessions,
                            "host unhealthy"
                        );
                    }
                    next_health = Instant::now() + self.health.next_poll_delay();
                }
                _ = sleep_until(next_reap) => {
                    self.reap();
                    next_reap = Instant::now() + reaper_interval;
                }
            }
        }
        debug!("maintenance loop stopped");
    }

    /// Cancel every session, wait for drains up to the grace period, then
    /// abort stragglers. Returns the number of aborted drivers.
    pub async fn shutdown(&self) -> usize {
        info!(active = self.registry.active_count(), "host shutting down");
        let aborted = self.tasks.shutdown(self.config.shutdown_grace).await;
        let event_loop = self.event_loop.lock().take();
        if let Some(handle) = event_loop {
            let _ = handle.await;
        }
        aborted
    }
}
