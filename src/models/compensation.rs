use crate::models::Versioned;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationActionType {
    CancelOrder,
    ReverseCharge,
    /// Tell the lab to discard specimens
    NotifyLab,
    ReleaseResource,
    CancelAppointment,
    EscalateManager,
    SendNotification,
    RequeueTask,
    Custom,
}

impl CompensationActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CancelOrder => "CANCEL_ORDER",
            Self::ReverseCharge => "REVERSE_CHARGE",
            Self::NotifyLab => "NOTIFY_LAB",
            Self::ReleaseResource => "RELEASE_RESOURCE",
            Self::CancelAppointment => "CANCEL_APPOINTMENT",
            Self::EscalateManager => "ESCALATE_MANAGER",
            Self::SendNotification => "SEND_NOTIFICATION",
            Self::RequeueTask => "REQUEUE_TASK",
            Self::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for CompensationActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded undo step for a cancelled order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAction {
    pub action_id: Uuid,
    pub order_id: Uuid,
    pub action_type: CompensationActionType,
    pub description: String,
    pub triggering_event: String,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_result: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Handed to the effect so a repeated execution can be recognized downstream
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl CompensationAction {
    pub fn new(
        order_id: Uuid,
        action_type: CompensationActionType,
        description: impl Into<String>,
        triggering_event: impl Into<String>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            action_id: Uuid::new_v4(),
            order_id,
            action_type,
            description: description.into(),
            triggering_event: triggering_event.into(),
            executed: false,
            executed_at: None,
            execution_result: None,
            error_message: None,
            retry_count: 0,
            max_retries,
            idempotency_key: format!("{order_id}:{action_type}"),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !self.executed && self.retry_count < self.max_retries
    }

    /// Not executed and out of retries; needs a manual decision
    pub fn is_exhausted(&self) -> bool {
        !self.executed && self.retry_count >= self.max_retries
    }

    pub fn record_success(&mut self, result: impl Into<String>, now: DateTime<Utc>) {
        self.executed = true;
        self.executed_at = Some(now);
        self.execution_result = Some(result.into());
        self.error_message = None;
        self.updated_at = now;
    }

    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.error_message = Some(error.into());
        self.updated_at = now;
    }
}

impl Versioned for CompensationAction {
    const ENTITY: &'static str = "CompensationAction";

    fn id(&self) -> Uuid {
        self.action_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
