// State machine module for care pathway entities
//
// Tasks, orders and workflow instances each have a machine that resolves the
// target state from a transition table, checks guards, applies the entity
// changes and returns the lifecycle events the transition announces.
// Machines are synchronous and never touch storage; the engine persists.

pub mod actions;
pub mod errors;
pub mod events;
pub mod guards;
pub mod order_state_machine;
pub mod states;
pub mod task_state_machine;
pub mod workflow_state_machine;

// Re-export main types for convenient access
pub use errors::{ActionError, GuardError, StateMachineError, StateMachineResult};
pub use events::{OrderEvent, TaskEvent, WorkflowEvent};
pub use order_state_machine::OrderStateMachine;
pub use states::{OrderState, TaskState, WorkflowState};
pub use task_state_machine::TaskStateMachine;
pub use workflow_state_machine::{settle_event, WorkflowStateMachine};

// Common traits and utilities
pub use actions::{StateAction, TransitionRecord};
pub use guards::StateGuard;

use crate::events::LifecycleEvent;

/// Result of an applied transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome<S> {
    pub from: S,
    pub to: S,
    /// Events to publish once the entity is persisted
    pub events: Vec<LifecycleEvent>,
}
