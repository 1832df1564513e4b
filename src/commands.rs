use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::agent_engine::event_bus::{CancelFlag, StepEvent};
use crate::agent_engine::state::{AgentEvent, AgentState};
use crate::agent_engine::AgentEngine;
use crate::errors::{VisorError, VisorResult};

/// Caller-side handle to an engine running on its own task.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancelFlag,
    busy: Arc<AtomicBool>,
    events: broadcast::Sender<StepEvent>,
    state: watch::Receiver<AgentState>,
}

impl AgentHandle {
    /// Wires a handle to `engine`. The returned receiver feeds [`AgentEngine::run_loop`].
    pub fn attach(engine: &AgentEngine) -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel::<AgentEvent>(32);
        let handle = Self {
            tx,
            cancel: engine.cancel_flag(),
            busy: engine.busy_flag(),
            events: engine.event_sender(),
            state: engine.watch_state(),
        };
        (handle, rx)
    }

    /// Queues a new task. Rejected while another task is queued or running.
    ///
    /// The stop flag is reset here rather than when the engine dequeues the
    /// goal, so a [`stop`](Self::stop) right after this call is honoured.
    pub async fn start(&self, task: impl Into<String>) -> VisorResult<()> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(VisorError::AlreadyRunning);
        }
        self.cancel.clear();
        let task = task.into();
        tracing::info!(task = %task, "start requested");
        if self.tx.send(AgentEvent::GoalReceived(task)).await.is_err() {
            self.busy.store(false, Ordering::SeqCst);
            return Err(VisorError::Agent("agent loop not running".into()));
        }
        Ok(())
    }

    /// Asks the running task to stop at its next checkpoint.
    pub fn stop(&self) {
        tracing::info!("stop requested");
        self.cancel.cancel();
    }

    pub async fn shutdown(&self) -> VisorResult<()> {
        self.cancel.cancel();
        self.tx
            .send(AgentEvent::Shutdown)
            .await
            .map_err(|_| VisorError::Agent("agent loop not running".into()))
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.events.subscribe()
    }

    /// Calls `callback` for every step event. Abort the returned handle to stop listening.
    pub fn on_step_event<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(StepEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "step event listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
