//! # Event Dispatcher
//!
//! Reacts to lifecycle events by issuing follow-up commands on the engine:
//! activating the next task of a pathway, retrying or recovering failed
//! tasks, activating authorized lab and imaging orders, running
//! compensations for cancelled orders and escalating failed workflows.
//!
//! Every command carries the causing event's context so a chain of
//! reactions can be traced by correlation id and is cut off once it grows
//! deeper than the configured propagation depth.

use super::engine::CarePathwayEngine;
use crate::constants::system::WORKFLOW_FAILED_ESCALATION_REASON;
use crate::error::{CarePathwayError, Result};
use crate::events::{EventContext, EventEnvelope, EventHandler, LifecycleEvent};
use crate::notification::{NotificationRequest, NotificationType};
use crate::state_machine::{TaskEvent, TaskState, WorkflowEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventDispatcher {
    engine: Arc<CarePathwayEngine>,
    max_depth: u32,
}

impl EventDispatcher {
    pub fn new(engine: Arc<CarePathwayEngine>) -> Self {
        let max_depth = engine.config().dispatcher.max_propagation_depth;
        Self { engine, max_depth }
    }

    /// Decode a serialized event and dispatch it
    pub async fn handle_raw(&self, payload: &str) -> Result<()> {
        let event = LifecycleEvent::from_json(payload)?;
        self.dispatch(&event).await
    }

    pub async fn dispatch(&self, event: &LifecycleEvent) -> Result<()> {
        let envelope = event.envelope();
        if envelope.depth >= self.max_depth {
            warn!(
                event_type = event.event_type(),
                correlation_id = %envelope.correlation_id,
                depth = envelope.depth,
                max_depth = self.max_depth,
                "Propagation depth exceeded; event dropped"
            );
            return Ok(());
        }

        debug!(
            event_type = event.event_type(),
            workflow_id = %event.workflow_id(),
            depth = envelope.depth,
            "Dispatching event"
        );

        match event {
            LifecycleEvent::TaskCompleted {
                envelope,
                workflow_id,
                task_id,
                definition_id,
            } => {
                self.on_task_completed(envelope, *workflow_id, *task_id, *definition_id)
                    .await
            }
            LifecycleEvent::TaskFailed {
                envelope,
                workflow_id,
                task_id,
                definition_id,
                ..
            } => {
                self.on_task_failed(envelope, *workflow_id, *task_id, *definition_id)
                    .await
            }
            LifecycleEvent::TaskEscalated {
                workflow_id,
                task_id,
                escalated_to,
                reason,
                ..
            } => {
                let request = NotificationRequest::new(
                    escalated_to.as_str(),
                    NotificationType::TaskEscalation,
                    "Task escalated",
                    format!("Task {task_id} was escalated to you: {reason}"),
                )
                .for_workflow(*workflow_id)
                .for_task(*task_id);
                self.engine.notifications().notify(request).await;
                Ok(())
            }
            LifecycleEvent::OrderAuthorized {
                envelope, order_id, ..
            } => {
                self.engine
                    .auto_activate_order(*order_id, EventContext::caused_by(envelope))
                    .await?;
                Ok(())
            }
            LifecycleEvent::OrderCancelled { order_id, .. } => {
                let report = self.engine.execute_pending_compensations(*order_id).await?;
                info!(
                    order_id = %order_id,
                    attempted = report.attempted,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "Compensations executed for cancelled order"
                );
                Ok(())
            }
            LifecycleEvent::WorkflowFailed {
                envelope,
                workflow_id,
                reason,
            } => self.on_workflow_failed(envelope, *workflow_id, reason).await,
            other => {
                debug!(
                    event_type = other.event_type(),
                    entity_id = %other.entity_id(),
                    "No follow-up for event"
                );
                Ok(())
            }
        }
    }

    /// Make the successor task ready, then let the workflow settle
    async fn on_task_completed(
        &self,
        envelope: &EventEnvelope,
        workflow_id: Uuid,
        task_id: Uuid,
        definition_id: Uuid,
    ) -> Result<()> {
        let context = EventContext::caused_by(envelope);
        let workflow = self.engine.get_workflow(workflow_id).await?;
        if workflow.status.is_terminal() {
            debug!(workflow_id = %workflow_id, status = %workflow.status, "Workflow closed; completion not propagated");
            return Ok(());
        }

        let template = self.engine.get_template(workflow.template_id).await?;
        let next = template
            .task(definition_id)
            .and_then(|definition| definition.next_task_id);

        if let Some(next_definition) = next {
            if let Some(next_task) = self
                .engine
                .task_for_definition(workflow_id, next_definition)
                .await?
            {
                let held = self.engine.has_blocking_instructions(workflow_id).await?;
                if held {
                    info!(
                        workflow_id = %workflow_id,
                        completed_task = %task_id,
                        next_task = %next_task.task_id,
                        "Blocking instruction holds the next task"
                    );
                }
                self.engine
                    .mark_task_ready(next_task.task_id, held, context)
                    .await?;
            }
        }

        self.engine
            .update_workflow_status_with(workflow_id, context)
            .await?;
        Ok(())
    }

    /// Retry while attempts remain, otherwise take the recovery path
    async fn on_task_failed(
        &self,
        envelope: &EventEnvelope,
        workflow_id: Uuid,
        task_id: Uuid,
        definition_id: Uuid,
    ) -> Result<()> {
        let context = EventContext::caused_by(envelope);
        let workflow = self.engine.get_workflow(workflow_id).await?;
        if workflow.status.is_terminal() {
            debug!(workflow_id = %workflow_id, status = %workflow.status, "Workflow closed; failure not propagated");
            return Ok(());
        }

        let task = self.engine.get_task(task_id).await?;
        if task.status == TaskState::Failed && task.is_retryable() {
            match self
                .engine
                .apply_task_event(task_id, TaskEvent::Retry, context)
                .await
            {
                Ok(task) => {
                    info!(
                        task_id = %task_id,
                        retry_count = task.retry_count,
                        max_retries = task.max_retries,
                        "Task scheduled for retry"
                    );
                    return Ok(());
                }
                Err(CarePathwayError::Conflict(reason)) => {
                    debug!(task_id = %task_id, reason = %reason, "Retry superseded");
                    return Ok(());
                }
                Err(error) => return Err(error),
            }
        }

        let template = self.engine.get_template(workflow.template_id).await?;
        let recovery = template
            .task(definition_id)
            .and_then(|definition| definition.failure_task_id);
        if let Some(recovery_definition) = recovery {
            if let Some(recovery_task) = self
                .engine
                .task_for_definition(workflow_id, recovery_definition)
                .await?
            {
                info!(
                    failed_task = %task_id,
                    recovery_task = %recovery_task.task_id,
                    "Activating recovery task"
                );
                let held = self.engine.has_blocking_instructions(workflow_id).await?;
                self.engine
                    .mark_task_ready(recovery_task.task_id, held, context)
                    .await?;
            }
        }

        self.engine
            .update_workflow_status_with(workflow_id, context)
            .await?;
        Ok(())
    }

    async fn on_workflow_failed(
        &self,
        envelope: &EventEnvelope,
        workflow_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        let context = EventContext::caused_by(envelope);
        let workflow = self
            .engine
            .apply_workflow_event(
                workflow_id,
                WorkflowEvent::Escalate(WORKFLOW_FAILED_ESCALATION_REASON.to_string()),
                context,
            )
            .await?;

        let target = self.engine.config().sla.default_escalation_target.clone();
        let request = NotificationRequest::new(
            target,
            NotificationType::WorkflowFailure,
            "Care pathway failed",
            format!(
                "Workflow {workflow_id} for patient {} failed: {reason}",
                workflow.patient_id
            ),
        )
        .for_workflow(workflow_id);
        self.engine.notifications().notify(request).await;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for EventDispatcher {
    fn name(&self) -> &'static str {
        "event_dispatcher"
    }

    async fn handle(&self, event: LifecycleEvent) -> Result<()> {
        self.dispatch(&event).await
    }
}
