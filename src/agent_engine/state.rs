use serde::{Deserialize, Serialize};

/// Lifecycle states of the agent. Only the engine writes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Stopping,
    Completed,
    Stopped,
    Failed,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Completed | AgentState::Stopped | AgentState::Failed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, AgentState::Running | AgentState::Stopping)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub goal: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Commands sent to the engine's service loop.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    GoalReceived(String),
    Shutdown,
}

/// How one step ended when it did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Done,
    Stopped,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    StoppedByUser,
    StepLimitReached,
    Failed(String),
}

impl RunOutcome {
    pub fn state(&self) -> AgentState {
        match self {
            RunOutcome::Completed => AgentState::Completed,
            RunOutcome::StoppedByUser | RunOutcome::StepLimitReached => AgentState::Stopped,
            RunOutcome::Failed(_) => AgentState::Failed,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "Completed"),
            RunOutcome::StoppedByUser => write!(f, "Stopped by user"),
            RunOutcome::StepLimitReached => write!(f, "Stopped: step limit reached"),
            RunOutcome::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_strings() {
        assert_eq!(RunOutcome::Completed.to_string(), "Completed");
        assert_eq!(RunOutcome::StoppedByUser.to_string(), "Stopped by user");
        assert_eq!(
            RunOutcome::Failed("LLM invocation failed: rate limited".into()).to_string(),
            "Failed: LLM invocation failed: rate limited"
        );
    }

    #[test]
    fn outcome_states() {
        assert_eq!(RunOutcome::StepLimitReached.state(), AgentState::Stopped);
        assert!(RunOutcome::Failed(String::new()).state().is_terminal());
        assert!(!AgentState::Running.is_terminal());
        assert!(AgentState::Stopping.is_active());
    }
}
