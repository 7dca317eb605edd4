use super::errors::ActionResult;
use crate::events::types::{EventContext, EventEnvelope, LifecycleEvent};
use crate::models::{Order, TaskInstance, WorkflowInstance};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// What happened in one applied transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub event_type: &'static str,
    /// Reason, error message or result carried by the triggering event
    pub detail: Option<String>,
    pub actor: Option<String>,
    pub context: EventContext,
    pub occurred_at: DateTime<Utc>,
}

impl TransitionRecord {
    fn envelope(&self) -> EventEnvelope {
        EventEnvelope::new(self.context, self.occurred_at)
    }

    fn detail_or_empty(&self) -> String {
        self.detail.clone().unwrap_or_default()
    }
}

/// Trait for implementing state transition actions
pub trait StateAction<T> {
    /// Execute the action, collecting any lifecycle events it produces
    fn execute(
        &self,
        entity: &T,
        transition: &TransitionRecord,
        emitted: &mut Vec<LifecycleEvent>,
    ) -> ActionResult<()>;

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

/// Action to announce transitions as lifecycle events
pub struct PublishTransitionEventAction;

impl StateAction<TaskInstance> for PublishTransitionEventAction {
    fn execute(
        &self,
        task: &TaskInstance,
        transition: &TransitionRecord,
        emitted: &mut Vec<LifecycleEvent>,
    ) -> ActionResult<()> {
        if let Some(event) = task_lifecycle_event(task, transition) {
            emitted.push(event);
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Publish task transition event"
    }
}

impl StateAction<Order> for PublishTransitionEventAction {
    fn execute(
        &self,
        order: &Order,
        transition: &TransitionRecord,
        emitted: &mut Vec<LifecycleEvent>,
    ) -> ActionResult<()> {
        if let Some(event) = order_lifecycle_event(order, transition) {
            emitted.push(event);
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Publish order transition event"
    }
}

impl StateAction<WorkflowInstance> for PublishTransitionEventAction {
    fn execute(
        &self,
        workflow: &WorkflowInstance,
        transition: &TransitionRecord,
        emitted: &mut Vec<LifecycleEvent>,
    ) -> ActionResult<()> {
        if let Some(event) = workflow_lifecycle_event(workflow, transition) {
            emitted.push(event);
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Publish workflow transition event"
    }
}

/// Action to log entry into failure and cancellation states
pub struct ErrorStateLoggingAction;

impl ErrorStateLoggingAction {
    fn log(entity: &'static str, id: uuid::Uuid, transition: &TransitionRecord) {
        if matches!(transition.to.as_str(), "FAILED" | "CANCELLED") && transition.from != transition.to {
            warn!(
                entity = entity,
                entity_id = %id,
                from_state = %transition.from,
                to_state = %transition.to,
                detail = transition.detail.as_deref().unwrap_or(""),
                "Entity entered error state"
            );
        }
    }
}

impl StateAction<TaskInstance> for ErrorStateLoggingAction {
    fn execute(&self, task: &TaskInstance, transition: &TransitionRecord, _: &mut Vec<LifecycleEvent>) -> ActionResult<()> {
        Self::log("TaskInstance", task.task_id, transition);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Log task error states"
    }
}

impl StateAction<Order> for ErrorStateLoggingAction {
    fn execute(&self, order: &Order, transition: &TransitionRecord, _: &mut Vec<LifecycleEvent>) -> ActionResult<()> {
        Self::log("Order", order.order_id, transition);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Log order error states"
    }
}

impl StateAction<WorkflowInstance> for ErrorStateLoggingAction {
    fn execute(
        &self,
        workflow: &WorkflowInstance,
        transition: &TransitionRecord,
        _: &mut Vec<LifecycleEvent>,
    ) -> ActionResult<()> {
        Self::log("WorkflowInstance", workflow.workflow_id, transition);
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Log workflow error states"
    }
}

/// Action to record the duration of finished workflows
pub struct WorkflowCompletionAction;

impl StateAction<WorkflowInstance> for WorkflowCompletionAction {
    fn execute(
        &self,
        workflow: &WorkflowInstance,
        transition: &TransitionRecord,
        _: &mut Vec<LifecycleEvent>,
    ) -> ActionResult<()> {
        if transition.to == "COMPLETED" {
            let duration_minutes = workflow
                .started_at
                .map(|started| (transition.occurred_at - started).num_minutes());
            info!(
                workflow_id = %workflow.workflow_id,
                patient_id = %workflow.patient_id,
                template = %workflow.template_name,
                duration_minutes = ?duration_minutes,
                "Workflow completed"
            );
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Record workflow completion"
    }
}

/// Map a task transition to the lifecycle event it announces, if any
fn task_lifecycle_event(task: &TaskInstance, transition: &TransitionRecord) -> Option<LifecycleEvent> {
    let envelope = transition.envelope();
    let event = match transition.event_type {
        "start" => LifecycleEvent::TaskStarted {
            envelope,
            workflow_id: task.workflow_id,
            task_id: task.task_id,
            started_by: transition.actor.clone(),
        },
        "complete" => LifecycleEvent::TaskCompleted {
            envelope,
            workflow_id: task.workflow_id,
            task_id: task.task_id,
            definition_id: task.definition_id,
        },
        "fail" => LifecycleEvent::TaskFailed {
            envelope,
            workflow_id: task.workflow_id,
            task_id: task.task_id,
            definition_id: task.definition_id,
            error_message: transition.detail_or_empty(),
            retry_count: task.retry_count,
        },
        "escalate" => LifecycleEvent::TaskEscalated {
            envelope,
            workflow_id: task.workflow_id,
            task_id: task.task_id,
            escalated_to: transition.actor.clone().unwrap_or_default(),
            reason: transition.detail_or_empty(),
        },
        _ => return None,
    };
    Some(event)
}

fn order_lifecycle_event(order: &Order, transition: &TransitionRecord) -> Option<LifecycleEvent> {
    let envelope = transition.envelope();
    let workflow_id = order.workflow_id;
    let order_id = order.order_id;
    let event = match transition.to.as_str() {
        "AUTHORIZED" => LifecycleEvent::OrderAuthorized {
            envelope,
            workflow_id,
            order_id,
            order_type: order.order_type,
            authorized_by: order.authorized_by.clone(),
        },
        "ACTIVATED" => LifecycleEvent::OrderActivated {
            envelope,
            workflow_id,
            order_id,
        },
        "RESULTED" | "DISPENSED" | "COMPLETED" => LifecycleEvent::OrderResulted {
            envelope,
            workflow_id,
            order_id,
            status: order.status,
            result: order.result.clone(),
        },
        "VERIFIED" => LifecycleEvent::OrderVerified {
            envelope,
            workflow_id,
            order_id,
            verified_by: order.verified_by.clone(),
        },
        "CLOSED" => LifecycleEvent::OrderClosed {
            envelope,
            workflow_id,
            order_id,
        },
        "CANCELLED" => LifecycleEvent::OrderCancelled {
            envelope,
            workflow_id,
            order_id,
            reason: transition.detail_or_empty(),
        },
        _ => return None,
    };
    Some(event)
}

fn workflow_lifecycle_event(
    workflow: &WorkflowInstance,
    transition: &TransitionRecord,
) -> Option<LifecycleEvent> {
    let envelope = transition.envelope();
    let workflow_id = workflow.workflow_id;
    let event = match transition.event_type {
        "start" => LifecycleEvent::WorkflowStarted {
            envelope,
            workflow_id,
            patient_id: workflow.patient_id.clone(),
            template_id: workflow.template_id,
        },
        "complete" => LifecycleEvent::WorkflowCompleted {
            envelope,
            workflow_id,
            patient_id: workflow.patient_id.clone(),
        },
        "fail" => LifecycleEvent::WorkflowFailed {
            envelope,
            workflow_id,
            reason: transition.detail_or_empty(),
        },
        "cancel" => LifecycleEvent::WorkflowCancelled {
            envelope,
            workflow_id,
            reason: transition.detail_or_empty(),
        },
        "escalate" => LifecycleEvent::WorkflowEscalated {
            envelope,
            workflow_id,
            reason: transition.detail_or_empty(),
        },
        _ => return None,
    };
    Some(event)
}
