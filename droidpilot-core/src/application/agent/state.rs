use serde::{Deserialize, Serialize};

/// Loop states. Planning -> Executing -> Verifying -> {Planning | Reporting};
/// Reporting -> Done; any state may escalate to Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Planning,
    Executing,
    Verifying,
    Reporting,
    Done,
    Failed,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Planning => "planning",
            AgentState::Executing => "executing",
            AgentState::Verifying => "verifying",
            AgentState::Reporting => "reporting",
            AgentState::Done => "done",
            AgentState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Done | AgentState::Failed)
    }
}
