//! # Lifecycle Events
//!
//! Every state change the engine makes is announced as a [`LifecycleEvent`].
//! The event dispatcher consumes them to drive follow-up work (activating the
//! next task, retrying, auto-activating orders, running compensations).
//!
//! Events are keyed by the owning workflow id, so all events of one workflow
//! are delivered in order by a single consumer.

use crate::constants::topics;
use crate::error::{CarePathwayError, Result};
use crate::models::OrderType;
use crate::state_machine::OrderState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Causal chain an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub correlation_id: Uuid,
    /// Number of dispatcher hops between the originating command and this event
    pub depth: u32,
}

impl EventContext {
    /// Context for a command issued from outside the engine
    pub fn root() -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            depth: 0,
        }
    }

    /// Context for commands the dispatcher issues while handling `parent`
    pub fn caused_by(parent: &EventEnvelope) -> Self {
        Self {
            correlation_id: parent.correlation_id,
            depth: parent.depth + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub depth: u32,
}

impl EventEnvelope {
    pub fn new(context: EventContext, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            correlation_id: context.correlation_id,
            occurred_at,
            depth: context.depth,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Task,
    Order,
    Workflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEvent {
    TaskCreated {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        task_id: Uuid,
        task_name: String,
    },
    TaskStarted {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        task_id: Uuid,
        started_by: Option<String>,
    },
    TaskCompleted {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        task_id: Uuid,
        definition_id: Uuid,
    },
    TaskFailed {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        task_id: Uuid,
        definition_id: Uuid,
        error_message: String,
        retry_count: u32,
    },
    TaskEscalated {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        task_id: Uuid,
        escalated_to: String,
        reason: String,
    },
    OrderCreated {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        order_id: Uuid,
        order_type: OrderType,
    },
    OrderAuthorized {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        order_id: Uuid,
        order_type: OrderType,
        authorized_by: Option<String>,
    },
    OrderActivated {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        order_id: Uuid,
    },
    OrderResulted {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        order_id: Uuid,
        status: OrderState,
        result: Option<String>,
    },
    OrderVerified {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        order_id: Uuid,
        verified_by: Option<String>,
    },
    OrderClosed {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        order_id: Uuid,
    },
    OrderCancelled {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        order_id: Uuid,
        reason: String,
    },
    WorkflowStarted {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        patient_id: String,
        template_id: Uuid,
    },
    WorkflowCompleted {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        patient_id: String,
    },
    WorkflowFailed {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        reason: String,
    },
    WorkflowEscalated {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        reason: String,
    },
    WorkflowCancelled {
        envelope: EventEnvelope,
        workflow_id: Uuid,
        reason: String,
    },
}

impl LifecycleEvent {
    /// Decode a wire payload; unknown event types are rejected
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| {
            CarePathwayError::Event(format!("Unrecognized lifecycle event: {e}"))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn envelope(&self) -> &EventEnvelope {
        match self {
            Self::TaskCreated { envelope, .. }
            | Self::TaskStarted { envelope, .. }
            | Self::TaskCompleted { envelope, .. }
            | Self::TaskFailed { envelope, .. }
            | Self::TaskEscalated { envelope, .. }
            | Self::OrderCreated { envelope, .. }
            | Self::OrderAuthorized { envelope, .. }
            | Self::OrderActivated { envelope, .. }
            | Self::OrderResulted { envelope, .. }
            | Self::OrderVerified { envelope, .. }
            | Self::OrderClosed { envelope, .. }
            | Self::OrderCancelled { envelope, .. }
            | Self::WorkflowStarted { envelope, .. }
            | Self::WorkflowCompleted { envelope, .. }
            | Self::WorkflowFailed { envelope, .. }
            | Self::WorkflowEscalated { envelope, .. }
            | Self::WorkflowCancelled { envelope, .. } => envelope,
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        match self {
            Self::TaskCreated { workflow_id, .. }
            | Self::TaskStarted { workflow_id, .. }
            | Self::TaskCompleted { workflow_id, .. }
            | Self::TaskFailed { workflow_id, .. }
            | Self::TaskEscalated { workflow_id, .. }
            | Self::OrderCreated { workflow_id, .. }
            | Self::OrderAuthorized { workflow_id, .. }
            | Self::OrderActivated { workflow_id, .. }
            | Self::OrderResulted { workflow_id, .. }
            | Self::OrderVerified { workflow_id, .. }
            | Self::OrderClosed { workflow_id, .. }
            | Self::OrderCancelled { workflow_id, .. }
            | Self::WorkflowStarted { workflow_id, .. }
            | Self::WorkflowCompleted { workflow_id, .. }
            | Self::WorkflowFailed { workflow_id, .. }
            | Self::WorkflowEscalated { workflow_id, .. }
            | Self::WorkflowCancelled { workflow_id, .. } => *workflow_id,
        }
    }

    /// Partitioning key
    pub fn key(&self) -> Uuid {
        self.workflow_id()
    }

    /// Id of the entity whose state changed
    pub fn entity_id(&self) -> Uuid {
        match self {
            Self::TaskCreated { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskEscalated { task_id, .. } => *task_id,
            Self::OrderCreated { order_id, .. }
            | Self::OrderAuthorized { order_id, .. }
            | Self::OrderActivated { order_id, .. }
            | Self::OrderResulted { order_id, .. }
            | Self::OrderVerified { order_id, .. }
            | Self::OrderClosed { order_id, .. }
            | Self::OrderCancelled { order_id, .. } => *order_id,
            other => other.workflow_id(),
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::TaskCreated { .. }
            | Self::TaskStarted { .. }
            | Self::TaskCompleted { .. }
            | Self::TaskFailed { .. }
            | Self::TaskEscalated { .. } => EventCategory::Task,
            Self::OrderCreated { .. }
            | Self::OrderAuthorized { .. }
            | Self::OrderActivated { .. }
            | Self::OrderResulted { .. }
            | Self::OrderVerified { .. }
            | Self::OrderClosed { .. }
            | Self::OrderCancelled { .. } => EventCategory::Order,
            _ => EventCategory::Workflow,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self.category() {
            EventCategory::Task => topics::TASK_EVENTS,
            EventCategory::Order => topics::ORDER_EVENTS,
            EventCategory::Workflow => topics::WORKFLOW_EVENTS,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "TASK_CREATED",
            Self::TaskStarted { .. } => "TASK_STARTED",
            Self::TaskCompleted { .. } => "TASK_COMPLETED",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::TaskEscalated { .. } => "TASK_ESCALATED",
            Self::OrderCreated { .. } => "ORDER_CREATED",
            Self::OrderAuthorized { .. } => "ORDER_AUTHORIZED",
            Self::OrderActivated { .. } => "ORDER_ACTIVATED",
            Self::OrderResulted { .. } => "ORDER_RESULTED",
            Self::OrderVerified { .. } => "ORDER_VERIFIED",
            Self::OrderClosed { .. } => "ORDER_CLOSED",
            Self::OrderCancelled { .. } => "ORDER_CANCELLED",
            Self::WorkflowStarted { .. } => "WORKFLOW_STARTED",
            Self::WorkflowCompleted { .. } => "WORKFLOW_COMPLETED",
            Self::WorkflowFailed { .. } => "WORKFLOW_FAILED",
            Self::WorkflowEscalated { .. } => "WORKFLOW_ESCALATED",
            Self::WorkflowCancelled { .. } => "WORKFLOW_CANCELLED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> EventEnvelope {
        EventEnvelope::new(EventContext::root(), Utc::now())
    }

    #[test]
    fn test_key_and_topic() {
        let workflow_id = Uuid::new_v4();
        let order_id = Uuid::new_v4();
        let event = LifecycleEvent::OrderCancelled {
            envelope: envelope(),
            workflow_id,
            order_id,
            reason: "duplicate".into(),
        };

        assert_eq!(event.key(), workflow_id);
        assert_eq!(event.entity_id(), order_id);
        assert_eq!(event.topic(), topics::ORDER_EVENTS);
        assert_eq!(event.event_type(), "ORDER_CANCELLED");
    }

    #[test]
    fn test_wire_format_round_trip() {
        let event = LifecycleEvent::TaskFailed {
            envelope: envelope(),
            workflow_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            definition_id: Uuid::new_v4(),
            error_message: "specimen clotted".into(),
            retry_count: 1,
        };

        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"TASK_FAILED\""));
        assert_eq!(LifecycleEvent::from_json(&json).unwrap(), event);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let payload = r#"{"type":"TASK_TELEPORTED","workflow_id":"00000000-0000-0000-0000-000000000000"}"#;
        let err = LifecycleEvent::from_json(payload).unwrap_err();
        assert!(matches!(err, CarePathwayError::Event(_)));
    }

    #[test]
    fn test_context_chaining() {
        let root = EventContext::root();
        let parent = EventEnvelope::new(root, Utc::now());
        let child = EventContext::caused_by(&parent);
        assert_eq!(child.correlation_id, root.correlation_id);
        assert_eq!(child.depth, 1);
    }
}
