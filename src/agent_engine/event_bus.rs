use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent_engine::state::AgentState;

/// Cooperative stop request. Sampled at suspension points, never interrupts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Status update published once per step (and once at the end of a run).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepEvent {
    pub step: u32,
    pub state: AgentState,
    pub message: String,
    pub actions_taken: Vec<String>,
    pub done: bool,
    pub error: Option<String>,
    /// Set on the final event of a run: "Completed", "Stopped by user", "Failed: ...".
    pub outcome: Option<String>,
    /// Truncated `role: text` lines of the remembered conversation; final event only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<String>,
}

impl StepEvent {
    pub fn status(step: u32, state: AgentState, message: impl Into<String>) -> Self {
        Self {
            step,
            state,
            message: message.into(),
            actions_taken: Vec::new(),
            done: false,
            error: None,
            outcome: None,
            history: Vec::new(),
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<StepEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<StepEvent> {
        self.tx.clone()
    }

    /// Publishes to current subscribers. Having none is fine.
    pub fn publish(&self, event: StepEvent) {
        tracing::debug!(step = event.step, state = ?event.state, msg = %event.message, "step event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
        other.clear();
        assert!(!flag.is_cancelled());
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(StepEvent::status(0, AgentState::Running, "Capturing screen"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.message, "Capturing screen");
        assert_eq!(ev.state, AgentState::Running);
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        EventBus::new(4).publish(StepEvent::status(1, AgentState::Idle, "idle"));
    }
}
