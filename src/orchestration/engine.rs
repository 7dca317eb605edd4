//! # Care Pathway Engine
//!
//! Command surface of the execution engine. Each command takes the lock of
//! the entity it mutates, re-reads it, runs the matching state machine,
//! persists the result with a version-checked save and releases the lock
//! before publishing the lifecycle events the transition produced.
//!
//! Cross-entity follow-up (activating the next task, retrying, running
//! compensations) is left to the [`EventDispatcher`](super::EventDispatcher),
//! which calls back into the engine with the causing event's context.

use super::compensation::{CompensationEngine, CompensationReport};
use super::locks::{EntityGuard, EntityLocks};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{CarePathwayError, Result};
use crate::events::{EventBus, EventContext, EventEnvelope, LifecycleEvent};
use crate::logging::{log_error, log_order_operation, log_task_operation, log_workflow_operation};
use crate::models::{
    order_completion_percentage, progress_percentage, CompensationAction, Instruction,
    InstructionType, NewOrder, Order, TaskInstance, WorkflowInstance, WorkflowTemplate,
};
use crate::notification::NotificationService;
use crate::repository::Repository;
use crate::state_machine::{
    guards::{StateGuard, TemplatePublishedGuard},
    settle_event, OrderEvent, OrderState, OrderStateMachine, StateMachineError, TaskEvent,
    TaskState, TaskStateMachine, WorkflowEvent, WorkflowState, WorkflowStateMachine,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Snapshot of how far a workflow has come
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub workflow_id: Uuid,
    pub status: WorkflowState,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub task_percentage: u32,
    pub total_orders: usize,
    pub order_percentage: u32,
    pub is_escalated: bool,
}

pub struct CarePathwayEngine {
    repository: Arc<dyn Repository>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
    locks: EntityLocks,
    compensation: Arc<CompensationEngine>,
    notifications: Arc<NotificationService>,
}

impl fmt::Debug for CarePathwayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarePathwayEngine")
            .field("repository", &self.repository)
            .field("bus", &self.bus)
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl CarePathwayEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        notifications: Arc<NotificationService>,
    ) -> Self {
        let compensation = Arc::new(CompensationEngine::new(
            Arc::clone(&repository),
            Arc::clone(&clock),
            config.compensation.clone(),
            Arc::clone(&notifications),
        ));

        Self {
            repository,
            bus,
            clock,
            config: Arc::new(config),
            locks: EntityLocks::new(),
            compensation,
            notifications,
        }
    }

    /// Replace the compensation engine, e.g. to register custom handlers
    pub fn with_compensation_engine(mut self, compensation: Arc<CompensationEngine>) -> Self {
        self.compensation = compensation;
        self
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compensation(&self) -> &Arc<CompensationEngine> {
        &self.compensation
    }

    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    pub(crate) async fn lock(&self, entity_id: Uuid) -> EntityGuard {
        self.locks.lock(entity_id).await
    }

    /// Entities currently locked or awaited
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// Publish after persistence; a failed publish is logged, the change stands
    pub(crate) async fn publish(&self, events: Vec<LifecycleEvent>) {
        for event in events {
            let topic = event.topic();
            let key = event.key();
            let event_type = event.event_type();
            if let Err(error) = self.bus.publish(topic, key, event).await {
                log_error("engine", "publish", &error.to_string(), Some(event_type));
            }
        }
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    pub async fn save_template(&self, template: WorkflowTemplate) -> Result<WorkflowTemplate> {
        self.repository.save_template(template).await
    }

    pub async fn get_template(&self, template_id: Uuid) -> Result<WorkflowTemplate> {
        self.repository.get_template(template_id).await
    }

    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    /// Instantiate a published template for a patient.
    ///
    /// Creates one PENDING task per definition and starts the workflow.
    pub async fn create_workflow(
        &self,
        patient_id: impl Into<String>,
        template_id: Uuid,
    ) -> Result<WorkflowInstance> {
        let template = self.repository.get_template(template_id).await?;
        TemplatePublishedGuard
            .check(&template)
            .map_err(StateMachineError::from)?;

        let now = self.clock.now();
        let context = EventContext::root();
        let mut workflow = WorkflowInstance::new(patient_id, &template, now);
        let tasks: Vec<TaskInstance> = template
            .task_definitions
            .iter()
            .map(|definition| {
                TaskInstance::from_definition(
                    workflow.workflow_id,
                    definition,
                    self.config.tasks.default_max_retries,
                    now,
                )
            })
            .collect();

        let outcome =
            WorkflowStateMachine::new(&mut workflow, &tasks, now, context).transition(WorkflowEvent::Start)?;
        let mut events = outcome.events;

        let workflow = self.repository.save_workflow(workflow).await?;
        for task in tasks {
            let task = self.repository.save_task(task).await?;
            events.push(LifecycleEvent::TaskCreated {
                envelope: EventEnvelope::new(context, now),
                workflow_id: workflow.workflow_id,
                task_id: task.task_id,
                task_name: task.name,
            });
        }

        log_workflow_operation(
            "create",
            workflow.workflow_id,
            workflow.status.as_str(),
            Some(&template.name),
        );
        self.publish(events).await;
        Ok(workflow)
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowInstance> {
        self.repository.get_workflow(workflow_id).await
    }

    pub async fn workflow_tasks(&self, workflow_id: Uuid) -> Result<Vec<TaskInstance>> {
        self.repository.tasks_for_workflow(workflow_id).await
    }

    pub async fn workflow_orders(&self, workflow_id: Uuid) -> Result<Vec<Order>> {
        self.repository.orders_for_workflow(workflow_id).await
    }

    pub async fn workflow_instructions(&self, workflow_id: Uuid) -> Result<Vec<Instruction>> {
        self.repository.instructions_for_workflow(workflow_id).await
    }

    pub async fn pause_workflow(&self, workflow_id: Uuid) -> Result<WorkflowInstance> {
        self.apply_workflow_event(workflow_id, WorkflowEvent::Pause, EventContext::root())
            .await
    }

    /// Resume a paused workflow, then settle it from the tasks that
    /// finished while it was paused
    pub async fn resume_workflow(&self, workflow_id: Uuid) -> Result<WorkflowInstance> {
        let context = EventContext::root();
        let workflow = self
            .apply_workflow_event(workflow_id, WorkflowEvent::Resume, context)
            .await?;
        if self.update_workflow_status_with(workflow_id, context).await?.is_some() {
            return self.repository.get_workflow(workflow_id).await;
        }
        Ok(workflow)
    }

    /// Complete explicitly; every required task must be COMPLETED
    pub async fn complete_workflow(&self, workflow_id: Uuid) -> Result<WorkflowInstance> {
        self.apply_workflow_event(workflow_id, WorkflowEvent::Complete, EventContext::root())
            .await
    }

    pub async fn escalate_workflow(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<WorkflowInstance> {
        self.apply_workflow_event(
            workflow_id,
            WorkflowEvent::Escalate(reason.into()),
            EventContext::root(),
        )
        .await
    }

    /// Cancel the workflow and force every open task to FAILED.
    ///
    /// Tasks are failed before the workflow is saved as CANCELLED. If a save
    /// fails part way, the task failures already persisted are still
    /// published.
    pub async fn cancel_workflow(
        &self,
        workflow_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<WorkflowInstance> {
        let reason = reason.into();
        let mut task_events = Vec::new();

        match self.cancel_locked(workflow_id, &reason, &mut task_events).await {
            Ok((workflow, mut events)) => {
                events.extend(task_events);
                log_workflow_operation("cancel", workflow_id, workflow.status.as_str(), Some(&reason));
                self.publish(events).await;
                Ok(workflow)
            }
            Err(error) => {
                self.publish(task_events).await;
                Err(error)
            }
        }
    }

    async fn cancel_locked(
        &self,
        workflow_id: Uuid,
        reason: &str,
        task_events: &mut Vec<LifecycleEvent>,
    ) -> Result<(WorkflowInstance, Vec<LifecycleEvent>)> {
        let context = EventContext::root();
        let _workflow_guard = self.lock(workflow_id).await;
        let mut workflow = self.repository.get_workflow(workflow_id).await?;
        let tasks = self.repository.tasks_for_workflow(workflow_id).await?;
        let now = self.clock.now();

        let outcome = WorkflowStateMachine::new(&mut workflow, &tasks, now, context)
            .transition(WorkflowEvent::Cancel(reason.to_string()))?;

        let failure = format!("Workflow cancelled: {reason}");
        for task in tasks.iter().filter(|task| !task.status.is_terminal()) {
            let _task_guard = self.lock(task.task_id).await;
            let mut current = self.repository.get_task(task.task_id).await?;
            match TaskStateMachine::new(&mut current, now, context)
                .transition(TaskEvent::Fail(failure.clone()))
            {
                Ok(task_outcome) => {
                    self.repository.save_task(current).await?;
                    task_events.extend(task_outcome.events);
                }
                // Settled between the read and the lock
                Err(error) => debug!(task_id = %task.task_id, error = %error, "Task not failed on cancel"),
            }
        }

        let workflow = self.repository.save_workflow(workflow).await?;
        Ok((workflow, outcome.events))
    }

    pub(crate) async fn apply_workflow_event(
        &self,
        workflow_id: Uuid,
        event: WorkflowEvent,
        context: EventContext,
    ) -> Result<WorkflowInstance> {
        let event_type = event.event_type();
        let (workflow, events) = {
            let _guard = self.lock(workflow_id).await;
            let mut workflow = self.repository.get_workflow(workflow_id).await?;
            let tasks = self.repository.tasks_for_workflow(workflow_id).await?;

            let outcome = WorkflowStateMachine::new(&mut workflow, &tasks, self.clock.now(), context)
                .transition(event)?;
            (self.repository.save_workflow(workflow).await?, outcome.events)
        };

        log_workflow_operation(event_type, workflow_id, workflow.status.as_str(), workflow.notes.as_deref());
        self.publish(events).await;
        Ok(workflow)
    }

    /// Re-derive an ACTIVE workflow's status from its tasks.
    ///
    /// Returns the new state when the workflow settled.
    pub async fn update_workflow_status(&self, workflow_id: Uuid) -> Result<Option<WorkflowState>> {
        self.update_workflow_status_with(workflow_id, EventContext::root())
            .await
    }

    pub(crate) async fn update_workflow_status_with(
        &self,
        workflow_id: Uuid,
        context: EventContext,
    ) -> Result<Option<WorkflowState>> {
        let (state, events) = {
            let _guard = self.lock(workflow_id).await;
            let mut workflow = self.repository.get_workflow(workflow_id).await?;
            if workflow.status != WorkflowState::Active {
                return Ok(None);
            }

            let tasks = self.repository.tasks_for_workflow(workflow_id).await?;
            let template = self.repository.get_template(workflow.template_id).await?;
            let has_recovery_path = |task: &TaskInstance| {
                template
                    .task(task.definition_id)
                    .is_some_and(|definition| definition.failure_task_id.is_some())
            };

            let Some(event) = settle_event(&tasks, has_recovery_path) else {
                return Ok(None);
            };

            let outcome = WorkflowStateMachine::new(&mut workflow, &tasks, self.clock.now(), context)
                .transition(event)?;
            self.repository.save_workflow(workflow).await?;
            (outcome.to, outcome.events)
        };

        log_workflow_operation("settle", workflow_id, state.as_str(), None);
        self.publish(events).await;
        Ok(Some(state))
    }

    pub async fn workflow_progress(&self, workflow_id: Uuid) -> Result<WorkflowProgress> {
        let workflow = self.repository.get_workflow(workflow_id).await?;
        let tasks = self.repository.tasks_for_workflow(workflow_id).await?;
        let orders = self.repository.orders_for_workflow(workflow_id).await?;

        Ok(WorkflowProgress {
            workflow_id,
            status: workflow.status,
            total_tasks: tasks.len(),
            completed_tasks: tasks
                .iter()
                .filter(|task| task.status == TaskState::Completed)
                .count(),
            task_percentage: progress_percentage(&tasks),
            total_orders: orders.len(),
            order_percentage: order_completion_percentage(&orders),
            is_escalated: workflow.is_escalated,
        })
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn get_task(&self, task_id: Uuid) -> Result<TaskInstance> {
        self.repository.get_task(task_id).await
    }

    pub async fn assign_task(&self, task_id: Uuid, assignee: impl Into<String>) -> Result<TaskInstance> {
        self.apply_task_event(task_id, TaskEvent::Assign(assignee.into()), EventContext::root())
            .await
    }

    pub async fn start_task(&self, task_id: Uuid, started_by: Option<String>) -> Result<TaskInstance> {
        self.apply_task_event(task_id, TaskEvent::Start { started_by }, EventContext::root())
            .await
    }

    pub async fn complete_task(
        &self,
        task_id: Uuid,
        result: Option<String>,
        completed_by: Option<String>,
    ) -> Result<TaskInstance> {
        self.apply_task_event(
            task_id,
            TaskEvent::Complete {
                result,
                completed_by,
            },
            EventContext::root(),
        )
        .await
    }

    pub async fn fail_task(&self, task_id: Uuid, error: impl Into<String>) -> Result<TaskInstance> {
        self.apply_task_event(task_id, TaskEvent::Fail(error.into()), EventContext::root())
            .await
    }

    pub async fn retry_task(&self, task_id: Uuid) -> Result<TaskInstance> {
        self.apply_task_event(task_id, TaskEvent::Retry, EventContext::root())
            .await
    }

    /// Flag the task for attention; its status is unchanged
    pub async fn escalate_task(
        &self,
        task_id: Uuid,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<TaskInstance> {
        self.apply_task_event(
            task_id,
            TaskEvent::Escalate {
                target: target.into(),
                reason: reason.into(),
            },
            EventContext::root(),
        )
        .await
    }

    /// Skip an optional task, then let the workflow settle
    pub async fn skip_task(&self, task_id: Uuid) -> Result<TaskInstance> {
        let context = EventContext::root();
        let task = self.apply_task_event(task_id, TaskEvent::Skip, context).await?;
        self.update_workflow_status_with(task.workflow_id, context)
            .await?;
        Ok(task)
    }

    pub(crate) async fn apply_task_event(
        &self,
        task_id: Uuid,
        event: TaskEvent,
        context: EventContext,
    ) -> Result<TaskInstance> {
        let event_type = event.event_type();
        let (task, events) = {
            let _guard = self.lock(task_id).await;
            let mut task = self.repository.get_task(task_id).await?;
            let outcome =
                TaskStateMachine::new(&mut task, self.clock.now(), context).transition(event)?;
            (self.repository.save_task(task).await?, outcome.events)
        };

        log_task_operation(
            event_type,
            task.task_id,
            task.workflow_id,
            task.status.as_str(),
            task.error_message.as_deref(),
        );
        self.publish(events).await;
        Ok(task)
    }

    /// Make a task ready to start, or hold it BLOCKED.
    ///
    /// Tasks that already moved past PENDING are left alone.
    pub(crate) async fn mark_task_ready(
        &self,
        task_id: Uuid,
        held: bool,
        context: EventContext,
    ) -> Result<Option<TaskInstance>> {
        let task = self.repository.get_task(task_id).await?;
        if !matches!(task.status, TaskState::Pending | TaskState::Blocked) {
            debug!(
                task_id = %task_id,
                status = %task.status,
                "Task already past readiness; nothing to activate"
            );
            return Ok(None);
        }

        let event = if held { TaskEvent::Block } else { TaskEvent::Activate };
        match self.apply_task_event(task_id, event, context).await {
            Ok(task) => Ok(Some(task)),
            // Started or settled between the read and the lock
            Err(CarePathwayError::Conflict(reason)) => {
                debug!(task_id = %task_id, reason = %reason, "Readiness change skipped");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Task instance of `workflow_id` created from `definition_id`
    pub(crate) async fn task_for_definition(
        &self,
        workflow_id: Uuid,
        definition_id: Uuid,
    ) -> Result<Option<TaskInstance>> {
        Ok(self
            .repository
            .tasks_for_workflow(workflow_id)
            .await?
            .into_iter()
            .find(|task| task.definition_id == definition_id))
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Place a PROPOSED order inside an open workflow
    pub async fn create_order(&self, request: NewOrder) -> Result<Order> {
        let workflow = self.repository.get_workflow(request.workflow_id).await?;
        if workflow.status.is_terminal() {
            return Err(CarePathwayError::conflict(format!(
                "Workflow {} is {} and accepts no new orders",
                workflow.workflow_id, workflow.status
            )));
        }

        let now = self.clock.now();
        let order = self.repository.save_order(Order::new(request, now)).await?;
        log_order_operation(
            "create",
            order.order_id,
            order.workflow_id,
            order.status.as_str(),
            Some(order.order_type.as_str()),
        );

        self.publish(vec![LifecycleEvent::OrderCreated {
            envelope: EventEnvelope::new(EventContext::root(), now),
            workflow_id: order.workflow_id,
            order_id: order.order_id,
            order_type: order.order_type,
        }])
        .await;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.repository.get_order(order_id).await
    }

    pub async fn authorize_order(&self, order_id: Uuid, authorized_by: impl Into<String>) -> Result<Order> {
        self.apply_order_event(
            order_id,
            OrderEvent::Authorize {
                authorized_by: authorized_by.into(),
            },
            EventContext::root(),
        )
        .await
    }

    pub async fn activate_order(&self, order_id: Uuid) -> Result<Order> {
        self.apply_order_event(order_id, OrderEvent::Activate, EventContext::root())
            .await
    }

    pub async fn start_order(&self, order_id: Uuid) -> Result<Order> {
        self.apply_order_event(order_id, OrderEvent::Start, EventContext::root())
            .await
    }

    /// Record a result; medication orders become DISPENSED, others RESULTED
    pub async fn result_order(&self, order_id: Uuid, result: impl Into<String>) -> Result<Order> {
        self.apply_order_event(order_id, OrderEvent::Result(result.into()), EventContext::root())
            .await
    }

    pub async fn complete_order(&self, order_id: Uuid, result: Option<String>) -> Result<Order> {
        self.apply_order_event(order_id, OrderEvent::Complete(result), EventContext::root())
            .await
    }

    pub async fn verify_order(&self, order_id: Uuid, verified_by: impl Into<String>) -> Result<Order> {
        self.apply_order_event(
            order_id,
            OrderEvent::Verify {
                verified_by: verified_by.into(),
            },
            EventContext::root(),
        )
        .await
    }

    pub async fn close_order(&self, order_id: Uuid) -> Result<Order> {
        self.apply_order_event(order_id, OrderEvent::Close, EventContext::root())
            .await
    }

    /// Cancel an order and record the compensation actions it owes.
    ///
    /// The actions run when the dispatcher sees the `OrderCancelled` event,
    /// or on demand via [`execute_pending_compensations`](Self::execute_pending_compensations).
    pub async fn cancel_order(&self, order_id: Uuid, reason: impl Into<String>) -> Result<Order> {
        let reason = reason.into();
        let (order, actions, events) = {
            let _guard = self.lock(order_id).await;
            let mut order = self.repository.get_order(order_id).await?;
            let outcome = OrderStateMachine::new(&mut order, self.clock.now(), EventContext::root())
                .transition(OrderEvent::Cancel(reason.clone()))?;
            let order = self.repository.save_order(order).await?;

            let mut actions = Vec::new();
            for action in self.compensation.plan(&order, outcome.from) {
                actions.push(self.repository.save_compensation(action).await?);
            }
            (order, actions, outcome.events)
        };

        log_order_operation(
            "cancel",
            order.order_id,
            order.workflow_id,
            order.status.as_str(),
            Some(&format!("{reason} ({} compensation action(s))", actions.len())),
        );
        self.publish(events).await;
        Ok(order)
    }

    pub(crate) async fn apply_order_event(
        &self,
        order_id: Uuid,
        event: OrderEvent,
        context: EventContext,
    ) -> Result<Order> {
        let event_type = event.event_type();
        let (order, events) = {
            let _guard = self.lock(order_id).await;
            let mut order = self.repository.get_order(order_id).await?;
            let outcome =
                OrderStateMachine::new(&mut order, self.clock.now(), context).transition(event)?;
            (self.repository.save_order(order).await?, outcome.events)
        };

        log_order_operation(event_type, order.order_id, order.workflow_id, order.status.as_str(), None);
        self.publish(events).await;
        Ok(order)
    }

    /// Activate an authorized order whose type never needs a manual step
    pub(crate) async fn auto_activate_order(&self, order_id: Uuid, context: EventContext) -> Result<Option<Order>> {
        let order = self.repository.get_order(order_id).await?;
        if !order.order_type.auto_activates() {
            info!(
                order_id = %order_id,
                order_type = %order.order_type,
                "Order requires manual activation"
            );
            return Ok(None);
        }
        if order.status != OrderState::Authorized {
            debug!(order_id = %order_id, status = %order.status, "Order no longer awaiting activation");
            return Ok(None);
        }

        self.apply_order_event(order_id, OrderEvent::Activate, context)
            .await
            .map(Some)
    }

    pub async fn order_compensations(&self, order_id: Uuid) -> Result<Vec<CompensationAction>> {
        self.repository.compensations_for_order(order_id).await
    }

    pub async fn execute_pending_compensations(&self, order_id: Uuid) -> Result<CompensationReport> {
        self.compensation.execute_pending(order_id).await
    }

    // ------------------------------------------------------------------
    // Instructions and decisions
    // ------------------------------------------------------------------

    pub async fn add_instruction(
        &self,
        workflow_id: Uuid,
        instruction_type: InstructionType,
        text: impl Into<String>,
        blocking: bool,
    ) -> Result<Instruction> {
        self.repository.get_workflow(workflow_id).await?;
        let instruction = Instruction::new(workflow_id, instruction_type, text, blocking, self.clock.now());
        let instruction = self.repository.save_instruction(instruction).await?;

        info!(
            instruction_id = %instruction.instruction_id,
            workflow_id = %workflow_id,
            blocking = blocking,
            "Instruction added"
        );
        Ok(instruction)
    }

    /// Acknowledge an instruction; once no blocking instruction remains the
    /// workflow's BLOCKED tasks return to PENDING
    pub async fn acknowledge_instruction(
        &self,
        instruction_id: Uuid,
        user: impl Into<String>,
        notes: Option<String>,
    ) -> Result<Instruction> {
        let instruction = {
            let _guard = self.lock(instruction_id).await;
            let mut instruction = self.repository.get_instruction(instruction_id).await?;
            instruction.acknowledge(user, notes, self.clock.now())?;
            self.repository.save_instruction(instruction).await?
        };

        if !self.has_blocking_instructions(instruction.workflow_id).await? {
            let context = EventContext::root();
            for task in self.repository.tasks_for_workflow(instruction.workflow_id).await? {
                if task.status == TaskState::Blocked {
                    match self.apply_task_event(task.task_id, TaskEvent::Unblock, context).await {
                        Ok(_) | Err(CarePathwayError::Conflict(_)) => {}
                        Err(error) => return Err(error),
                    }
                }
            }
        }

        info!(
            instruction_id = %instruction_id,
            workflow_id = %instruction.workflow_id,
            "Instruction acknowledged"
        );
        Ok(instruction)
    }

    /// Whether an unacknowledged blocking instruction holds the workflow
    pub async fn has_blocking_instructions(&self, workflow_id: Uuid) -> Result<bool> {
        Ok(self
            .repository
            .instructions_for_workflow(workflow_id)
            .await?
            .iter()
            .any(Instruction::holds_propagation))
    }

    /// Evaluate a template decision against `facts` and make the selected
    /// task ready. Returns the selected task.
    pub async fn evaluate_decision(
        &self,
        workflow_id: Uuid,
        decision_id: Uuid,
        facts: &HashMap<String, Value>,
    ) -> Result<TaskInstance> {
        let workflow = self.repository.get_workflow(workflow_id).await?;
        let template = self.repository.get_template(workflow.template_id).await?;
        let definition_id = template.route(decision_id, facts)?;

        let task = self
            .task_for_definition(workflow_id, definition_id)
            .await?
            .ok_or_else(|| CarePathwayError::not_found("TaskInstance", definition_id))?;

        let held = self.has_blocking_instructions(workflow_id).await?;
        let ready = self
            .mark_task_ready(task.task_id, held, EventContext::root())
            .await?;

        info!(
            workflow_id = %workflow_id,
            decision_id = %decision_id,
            selected_task = %task.task_id,
            "Decision evaluated"
        );
        match ready {
            Some(task) => Ok(task),
            None => self.repository.get_task(task.task_id).await,
        }
    }
}
