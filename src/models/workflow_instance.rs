//! # Workflow Instance
//!
//! A care pathway running for one patient. Created from a published
//! `WorkflowTemplate`; owns its task instances, orders and instructions by id.

use crate::models::order::Order;
use crate::models::task_instance::TaskInstance;
use crate::models::template::WorkflowTemplate;
use crate::models::Versioned;
use crate::state_machine::{TaskState, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_id: Uuid,
    pub patient_id: String,
    pub template_id: Uuid,
    pub template_name: String,
    pub template_version: u32,
    pub status: WorkflowState,
    pub encounter_id: Option<String>,
    pub notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_escalated: bool,
    pub escalation_reason: Option<String>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl WorkflowInstance {
    /// New DRAFT instance; starting it is a state machine transition
    pub fn new(patient_id: impl Into<String>, template: &WorkflowTemplate, now: DateTime<Utc>) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            patient_id: patient_id.into(),
            template_id: template.template_id,
            template_name: template.name.clone(),
            template_version: template.template_version,
            status: WorkflowState::Draft,
            encounter_id: None,
            notes: None,
            started_at: None,
            completed_at: None,
            is_escalated: false,
            escalation_reason: None,
            escalated_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn with_encounter(mut self, encounter_id: impl Into<String>) -> Self {
        self.encounter_id = Some(encounter_id.into());
        self
    }
}

/// Completed tasks as a percentage of all tasks; 0 when there are none
pub fn progress_percentage(tasks: &[TaskInstance]) -> u32 {
    percentage(
        tasks
            .iter()
            .filter(|task| task.status == TaskState::Completed)
            .count(),
        tasks.len(),
    )
}

/// Verified or closed orders as a percentage of all orders; 0 when there are none
pub fn order_completion_percentage(orders: &[Order]) -> u32 {
    percentage(
        orders
            .iter()
            .filter(|order| order.status.counts_as_complete())
            .count(),
        orders.len(),
    )
}

fn percentage(done: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (done * 100 / total) as u32
}

impl Versioned for WorkflowInstance {
    const ENTITY: &'static str = "WorkflowInstance";

    fn id(&self) -> Uuid {
        self.workflow_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
