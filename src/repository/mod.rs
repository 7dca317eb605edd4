//! # Repository
//!
//! Storage capability the engine runs against. Saves are optimistic: a record
//! is written only if its `version` still matches the stored one, and the
//! stored copy comes back with the version bumped. A stale write fails with
//! `CarePathwayError::Conflict`.

pub mod memory;

pub use memory::InMemoryRepository;

use crate::error::Result;
use crate::models::{
    CompensationAction, Instruction, Order, TaskInstance, WorkflowInstance, WorkflowTemplate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait Repository: Send + Sync + std::fmt::Debug {
    async fn get_template(&self, template_id: Uuid) -> Result<WorkflowTemplate>;
    async fn save_template(&self, template: WorkflowTemplate) -> Result<WorkflowTemplate>;

    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowInstance>;
    async fn save_workflow(&self, workflow: WorkflowInstance) -> Result<WorkflowInstance>;

    async fn get_task(&self, task_id: Uuid) -> Result<TaskInstance>;
    async fn save_task(&self, task: TaskInstance) -> Result<TaskInstance>;
    async fn tasks_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<TaskInstance>>;
    /// Open tasks due before `now` that are not yet flagged as breached, oldest due first
    async fn find_overdue_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<TaskInstance>>;

    async fn get_order(&self, order_id: Uuid) -> Result<Order>;
    async fn save_order(&self, order: Order) -> Result<Order>;
    async fn orders_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Order>>;

    async fn save_compensation(&self, action: CompensationAction) -> Result<CompensationAction>;
    async fn get_compensation(&self, action_id: Uuid) -> Result<CompensationAction>;
    async fn compensations_for_order(&self, order_id: Uuid) -> Result<Vec<CompensationAction>>;
    /// Actions for the order that are not executed and still have retries left
    async fn find_pending_compensations(&self, order_id: Uuid) -> Result<Vec<CompensationAction>>;
    /// Actions that are not executed and have no retries left
    async fn find_exhausted_compensations(&self) -> Result<Vec<CompensationAction>>;
    async fn find_orders_with_pending_compensations(&self) -> Result<Vec<Uuid>>;

    async fn get_instruction(&self, instruction_id: Uuid) -> Result<Instruction>;
    async fn save_instruction(&self, instruction: Instruction) -> Result<Instruction>;
    async fn instructions_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Instruction>>;
}
