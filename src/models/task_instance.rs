//! # Task Instance
//!
//! Live execution record of one `TaskDefinition` inside a running workflow.
//!
//! State changes go through [`TaskStateMachine`](crate::state_machine::TaskStateMachine);
//! this module holds the data and the read-only predicates the engine, the
//! dispatcher and the SLA monitor share.

use crate::models::template::TaskDefinition;
use crate::models::Versioned;
use crate::state_machine::TaskState;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub task_id: Uuid,
    pub workflow_id: Uuid,
    pub definition_id: Uuid,
    pub name: String,
    /// Position of the definition inside its template
    pub sequence: u32,
    pub status: TaskState,
    pub is_optional: bool,
    pub assigned_to: Option<String>,
    pub required_role: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub started_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    /// Free-form history, entries joined with "; "
    pub comments: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub due_at: Option<DateTime<Utc>>,
    pub sla_minutes: u32,
    pub sla_breached: bool,
    pub is_escalated: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalated_to_user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl TaskInstance {
    /// Instantiate a definition for a workflow started at `now`.
    ///
    /// The definition's `assign_to` becomes both assignee and required role;
    /// a positive estimated duration sets the SLA window and due date.
    pub fn from_definition(
        workflow_id: Uuid,
        definition: &TaskDefinition,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let duration = definition.estimated_duration_minutes;
        let due_at = (duration > 0).then(|| now + Duration::minutes(i64::from(duration)));

        Self {
            task_id: Uuid::new_v4(),
            workflow_id,
            definition_id: definition.definition_id,
            name: definition.name.clone(),
            sequence: definition.order,
            status: TaskState::Pending,
            is_optional: definition.is_optional,
            assigned_to: definition.assign_to.clone(),
            required_role: definition.assign_to.clone(),
            started_at: None,
            started_by: None,
            completed_at: None,
            completed_by: None,
            result: None,
            error_message: None,
            comments: None,
            retry_count: 0,
            max_retries,
            due_at,
            sla_minutes: duration,
            sla_breached: false,
            is_escalated: false,
            escalated_at: None,
            escalated_to_user: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// A failed task with retry budget left
    pub fn is_retryable(&self) -> bool {
        self.status == TaskState::Failed && self.retry_count < self.max_retries
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at.is_some_and(|due| due < now)
    }

    /// Candidate for the SLA sweep: overdue, still open, not yet flagged
    pub fn is_sla_candidate(&self, now: DateTime<Utc>) -> bool {
        self.is_past_due(now) && self.status.is_open() && !self.sla_breached
    }

    /// Minutes until the due date; negative when overdue
    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.due_at.map(|due| (due - now).num_minutes())
    }

    pub fn append_comment(&mut self, entry: &str) {
        self.comments = Some(match self.comments.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}; {entry}"),
            _ => entry.to_string(),
        });
    }
}

impl Versioned for TaskInstance {
    const ENTITY: &'static str = "TaskInstance";

    fn id(&self) -> Uuid {
        self.task_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
