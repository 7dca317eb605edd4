use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a single clinical task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Created or made ready, waiting for someone to start it
    #[default]
    Pending,
    /// Someone is working on the task
    InProgress,
    Completed,
    /// Failed; may return to pending while retry budget remains
    Failed,
    /// Optional task deliberately not performed
    Skipped,
    /// Held back by an unacknowledged blocking instruction
    Blocked,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Pending,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
        Self::Skipped,
        Self::Blocked,
    ];

    /// Check if the task has settled (no further work happens without an explicit retry)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Check if the task still has work outstanding
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Invalid task state: {s}"))
    }
}

/// Lifecycle states of a clinical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    #[default]
    Proposed,
    Authorized,
    Activated,
    InProgress,
    Resulted,
    Dispensed,
    Completed,
    Verified,
    Closed,
    Cancelled,
}

impl OrderState {
    pub const ALL: [OrderState; 10] = [
        Self::Proposed,
        Self::Authorized,
        Self::Activated,
        Self::InProgress,
        Self::Resulted,
        Self::Dispensed,
        Self::Completed,
        Self::Verified,
        Self::Closed,
        Self::Cancelled,
    ];

    /// States reachable in one step from this one
    pub fn allowed_transitions(&self) -> &'static [OrderState] {
        use OrderState::*;
        match self {
            Proposed => &[Authorized, Cancelled],
            Authorized => &[Activated, Cancelled],
            Activated => &[InProgress, Cancelled],
            InProgress => &[Resulted, Dispensed, Completed, Cancelled],
            Resulted | Dispensed | Completed => &[Verified, Cancelled],
            Verified => &[Closed],
            Closed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: OrderState) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    /// States in which an order has produced its outcome
    pub fn has_outcome(&self) -> bool {
        matches!(self, Self::Resulted | Self::Dispensed | Self::Completed)
    }

    /// Counted as done for order-completion progress
    pub fn counts_as_complete(&self) -> bool {
        matches!(self, Self::Verified | Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "PROPOSED",
            Self::Authorized => "AUTHORIZED",
            Self::Activated => "ACTIVATED",
            Self::InProgress => "IN_PROGRESS",
            Self::Resulted => "RESULTED",
            Self::Dispensed => "DISPENSED",
            Self::Completed => "COMPLETED",
            Self::Verified => "VERIFIED",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Invalid order state: {s}"))
    }
}

/// Lifecycle states of a running pathway instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    #[default]
    Draft,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 6] = [
        Self::Draft,
        Self::Active,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("Invalid workflow state: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_terminal_check() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::InProgress.is_terminal());
        assert!(!TaskState::Blocked.is_terminal());
    }

    #[test]
    fn test_order_transition_table() {
        assert!(OrderState::Proposed.can_transition_to(OrderState::Authorized));
        assert!(!OrderState::Proposed.can_transition_to(OrderState::Activated));
        assert!(OrderState::InProgress.can_transition_to(OrderState::Dispensed));
        assert!(OrderState::Resulted.can_transition_to(OrderState::Verified));
        assert!(!OrderState::Verified.can_transition_to(OrderState::Cancelled));
        assert!(OrderState::Closed.allowed_transitions().is_empty());
        assert!(OrderState::Cancelled.allowed_transitions().is_empty());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(TaskState::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!(
            "BLOCKED".parse::<TaskState>().unwrap(),
            TaskState::Blocked
        );
        assert_eq!(
            "DISPENSED".parse::<OrderState>().unwrap(),
            OrderState::Dispensed
        );
        assert_eq!(WorkflowState::Paused.to_string(), "PAUSED");
        assert!("paused".parse::<WorkflowState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&OrderState::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");

        let state: TaskState = serde_json::from_str("\"SKIPPED\"").unwrap();
        assert_eq!(state, TaskState::Skipped);
    }

    #[test]
    fn test_default_states() {
        assert_eq!(TaskState::default(), TaskState::Pending);
        assert_eq!(OrderState::default(), OrderState::Proposed);
        assert_eq!(WorkflowState::default(), WorkflowState::Draft);
    }
}
