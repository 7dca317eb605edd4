use serde::{Deserialize, Serialize};

/// Commands that can move a task through its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Set the assignee; does not change state
    Assign(String),
    Start { started_by: Option<String> },
    Complete {
        result: Option<String>,
        completed_by: Option<String>,
    },
    Fail(String),
    /// Return a failed task to pending, consuming one retry
    Retry,
    /// Raise the task to a higher authority; does not change state
    Escalate { target: String, reason: String },
    Skip,
    /// Mark the task ready for work
    Activate,
    Block,
    Unblock,
}

impl TaskEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Assign(_) => "assign",
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::Fail(_) => "fail",
            Self::Retry => "retry",
            Self::Escalate { .. } => "escalate",
            Self::Skip => "skip",
            Self::Activate => "activate",
            Self::Block => "block",
            Self::Unblock => "unblock",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Events that only touch metadata and keep the current state
    pub fn preserves_state(&self) -> bool {
        matches!(self, Self::Assign(_) | Self::Escalate { .. })
    }
}

/// Commands that can move an order through its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Authorize { authorized_by: String },
    Activate,
    Start,
    /// Record the outcome; the target state depends on the order type
    Result(String),
    /// Finish an order that produces no result or dispensation
    Complete(Option<String>),
    Verify { verified_by: String },
    Close,
    Cancel(String),
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Authorize { .. } => "authorize",
            Self::Activate => "activate",
            Self::Start => "start",
            Self::Result(_) => "result",
            Self::Complete(_) => "complete",
            Self::Verify { .. } => "verify",
            Self::Close => "close",
            Self::Cancel(_) => "cancel",
        }
    }
}

/// Commands that can move a workflow instance through its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WorkflowEvent {
    Start,
    Pause,
    Resume,
    Complete,
    Fail(String),
    Cancel(String),
    /// Flag for review; does not change state
    Escalate(String),
}

impl WorkflowEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Cancel(_) => "cancel",
            Self::Escalate(_) => "escalate",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) | Self::Cancel(reason) | Self::Escalate(reason) => Some(reason),
            _ => None,
        }
    }
}
