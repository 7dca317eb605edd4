//! # Domain Models
//!
//! Data carried through the engine. Templates describe pathways; workflow
//! instances, task instances, orders, compensation actions and instructions
//! are the live records the repository stores.
//!
//! Every stored record implements [`Versioned`] so the repository can reject
//! stale writes.

pub mod compensation;
pub mod decision;
pub mod instruction;
pub mod order;
pub mod task_instance;
pub mod template;
pub mod workflow_instance;

pub use compensation::{CompensationAction, CompensationActionType};
pub use decision::{DecisionLogic, DecisionOperator};
pub use instruction::{Instruction, InstructionType};
pub use order::{NewOrder, Order, OrderPriority, OrderType};
pub use task_instance::TaskInstance;
pub use template::{ChecklistItem, Gate, GateType, TaskDefinition, TemplateStatus, WorkflowTemplate};
pub use workflow_instance::{order_completion_percentage, progress_percentage, WorkflowInstance};

use uuid::Uuid;

/// Record with an identity and an optimistic-concurrency version
pub trait Versioned: Clone + Send + Sync + 'static {
    const ENTITY: &'static str;

    fn id(&self) -> Uuid;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}
