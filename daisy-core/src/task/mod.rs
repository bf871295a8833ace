//! Tracking for per-session driver tasks.
//!
//! Each session runs as one spawned task holding a child of the pool's
//! shutdown token and the receiving end of a command channel. When a
//! task returns, it reports a [`TaskEvent`] to the pool, which forgets
//! the task and notifies registered callbacks.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DaisyError, TaskError};
use crate::model::{Codec, SessionId};

/// Types
pub type TaskEventSender = mpsc::Sender<TaskEvent>;
pub type CommandReceiver = mpsc::Receiver<SessionCommand>;
type TaskFinishedCallback = Arc<dyn Fn(&SessionId) + Send + Sync + 'static>;

/// Requests a caller can make of a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Teardown,
    Reconnect,
    Renegotiate(Codec),
}

#[derive(Debug)]
pub enum TaskEvent {
    Finished(SessionId),
    Error(SessionId, TaskError),
}

// ── SessionTask ──────────────────────────────────────────────────

pub struct SessionTask {
    session: SessionId,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionTask {
    /// Spawns `f` for `session` on the runtime.
    ///
    /// # Arguments
    ///
    /// * `session` - The session this task drives.
    /// * `parent` - Shutdown token; the task receives a child of it.
    /// * `buffer` - Capacity of the command channel.
    /// * `f` - The driver future factory.
    /// * `event_tx` - Where the completion event is sent.
    pub fn spawn<F, Fut>(
        session: SessionId,
        parent: &CancellationToken,
        buffer: usize,
        f: F,
        event_tx: TaskEventSender,
    ) -> Self
    where
        F: FnOnce(SessionId, CancellationToken, CommandReceiver) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DaisyError>> + Send + 'static,
    {
        let cancel = parent.child_token();
        let (commands, command_rx) = mpsc::channel(buffer.max(1));
        let id = session.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = f(id.clone(), token.clone(), command_rx).await;
            let event = match result {
                Ok(()) => TaskEvent::Finished(id),
                Err(_) if token.is_cancelled() => TaskEvent::Error(id, TaskError::Cancelled),
                Err(e) => TaskEvent::Error(id, TaskError::Failed(e.to_string())),
            };
            let _ = event_tx.send(event).await;
        });
        Self {
            session,
            handle,
            cancel,
            commands,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn commands(&self) -> mpsc::Sender<SessionCommand> {
        self.commands.clone()
    }

    /// Wait for the task to return, aborting it after `timeout`.
    pub async fn join(self, timeout: Duration) -> Result<(), TaskError> {
        let abort = self.handle.abort_handle();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_cancelled() => Err(TaskError::Cancelled),
            Ok(Err(e)) => Err(TaskError::Failed(e.to_string())),
            Err(_) => {
                abort.abort();
                Err(TaskError::Timeout(timeout))
            }
        }
    }
}

// ── TaskPool ─────────────────────────────────────────────────────

pub struct TaskPool {
    tasks: Mutex<HashMap<SessionId, SessionTask>>,
    shutdown: CancellationToken,
    pool_tx: TaskEventSender,
    pool_rx: tokio::sync::Mutex<mpsc::Receiver<TaskEvent>>,
    finished_callbacks: Mutex<Vec<TaskFinishedCallback>>,
}

impl TaskPool {
    pub fn new() -> Self {
        let (pool_tx, pool_rx) = mpsc::channel(1024);
        Self {
            tasks: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            pool_tx,
            pool_rx: tokio::sync::Mutex::new(pool_rx),
            finished_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a driver for `session`. Fails once shutdown has begun or if
    /// the session already has a running task.
    pub fn spawn<F, Fut>(&self, session: SessionId, buffer: usize, f: F) -> Result<(), DaisyError>
    where
        F: FnOnce(SessionId, CancellationToken, CommandReceiver) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DaisyError>> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(DaisyError::Other("task pool is shutting down".into()));
        }
        let mut tasks = self.tasks.lock();
        if tasks.get(&session).is_some_and(|t| !t.is_finished()) {
            return Err(DaisyError::Other(format!("session {session} already has a driver")));
        }
        let task = SessionTask::spawn(session.clone(), &self.shutdown, buffer, f, self.pool_tx.clone());
        tasks.insert(session, task);
        Ok(())
    }

    /// Deliver a command to a running session task.
    pub async fn send(&self, session: &SessionId, command: SessionCommand) -> Result<(), DaisyError> {
        let tx = self
            .tasks
            .lock()
            .get(session)
            .map(SessionTask::commands)
            .ok_or_else(|| DaisyError::session_not_found(session))?;
        tx.send(command).await?;
        Ok(())
    }

    pub fn cancel(&self, session: &SessionId) -> bool {
        match self.tasks.lock().get(session) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a task from the pool so the caller can join it.
    pub fn take(&self, session: &SessionId) -> Option<SessionTask> {
        self.tasks.lock().remove(session)
    }

    pub fn is_running(&self, session: &SessionId) -> bool {
        self.tasks
            .lock()
            .get(session)
            .is_some_and(|t| !t.is_finished())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    pub fn on_task_finished<F>(&self, f: F)
    where
        F: Fn(&SessionId) + Send + Sync + 'static,
    {
        self.finished_callbacks.lock().push(Arc::new(f));
    }

    pub fn process_event(&self, event: TaskEvent) {
        let session = match event {
            TaskEvent::Finished(session) => {
                debug!(session = %session, "session task finished");
                session
            }
            TaskEvent::Error(session, err) => {
                warn!(session = %session, "session task failed: {err}");
                session
            }
        };
        self.tasks.lock().remove(&session);
        // Callbacks run unlocked so they may call back into the pool.
        let callbacks = self.finished_callbacks.lock().clone();
        for callback in &callbacks {
            callback(&session);
        }
    }

    /// Process completion events until shutdown.
    pub async fn process_events(&self) {
        let mut rx = self.pool_rx.lock().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.process_event(event),
                    None => break,
                },
            }
        }
        while let Ok(event) = rx.try_recv() {
            self.process_event(event);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel every task, wait up to `grace` for them to return, then
    /// abort whatever is left. Returns the number of aborted tasks.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.shutdown.cancel();
        let tasks: Vec<SessionTask> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        if tasks.is_empty() {
            return 0;
        }

        let aborts: Vec<_> = tasks.iter().map(|t| t.handle.abort_handle()).collect();
        let handles = tasks.into_iter().map(|t| t.handle);
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_ok()
        {
            return 0;
        }

        let stragglers = aborts.iter().filter(|a| !a.is_finished()).count();
        for abort in &aborts {
            abort.abort();
        }
        warn!(stragglers, grace = ?grace, "aborted session tasks after grace period");
        stragglers
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
