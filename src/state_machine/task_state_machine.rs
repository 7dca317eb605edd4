use super::{
    actions::{ErrorStateLoggingAction, PublishTransitionEventAction, StateAction, TransitionRecord},
    errors::{invalid_transition, StateMachineResult},
    events::TaskEvent,
    guards::{StateGuard, TaskCanBeRetriedGuard, TaskIsOptionalGuard},
    states::TaskState,
    TransitionOutcome,
};
use crate::events::types::{EventContext, LifecycleEvent};
use crate::models::TaskInstance;
use chrono::{DateTime, Utc};
use tracing::debug;

/// State machine driving a single task instance
pub struct TaskStateMachine<'a> {
    task: &'a mut TaskInstance,
    now: DateTime<Utc>,
    context: EventContext,
}

impl<'a> TaskStateMachine<'a> {
    pub fn new(task: &'a mut TaskInstance, now: DateTime<Utc>, context: EventContext) -> Self {
        Self { task, now, context }
    }

    pub fn current_state(&self) -> TaskState {
        self.task.status
    }

    /// Attempt to transition the task state
    pub fn transition(&mut self, event: TaskEvent) -> StateMachineResult<TransitionOutcome<TaskState>> {
        let current_state = self.current_state();
        let target_state = Self::determine_target_state(current_state, &event)?;

        self.check_guards(current_state, target_state, &event)?;
        self.apply(target_state, &event);

        let record = TransitionRecord {
            from: current_state.to_string(),
            to: target_state.to_string(),
            event_type: event.event_type(),
            detail: match &event {
                TaskEvent::Fail(error) => Some(error.clone()),
                TaskEvent::Escalate { reason, .. } => Some(reason.clone()),
                TaskEvent::Complete { result, .. } => result.clone(),
                _ => None,
            },
            actor: match &event {
                TaskEvent::Start { started_by } => started_by.clone(),
                TaskEvent::Complete { completed_by, .. } => completed_by.clone(),
                TaskEvent::Escalate { target, .. } => Some(target.clone()),
                TaskEvent::Assign(assignee) => Some(assignee.clone()),
                _ => None,
            },
            context: self.context,
            occurred_at: self.now,
        };

        debug!(
            task_id = %self.task.task_id,
            from_state = %current_state,
            to_state = %target_state,
            event = event.event_type(),
            "Task transition"
        );

        let events = self.execute_actions(&record)?;
        Ok(TransitionOutcome {
            from: current_state,
            to: target_state,
            events,
        })
    }

    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskState> {
        use TaskState::*;

        let target = match (current_state, event) {
            (Pending, TaskEvent::Assign(_)) => Pending,
            // Escalation is metadata and keeps the state of any unfinished task
            (Pending | InProgress | Blocked | Failed, TaskEvent::Escalate { .. }) => current_state,

            (Pending, TaskEvent::Start { .. }) => InProgress,
            (InProgress, TaskEvent::Complete { .. }) => Completed,

            (Pending | InProgress | Blocked, TaskEvent::Fail(_)) => Failed,
            (Failed, TaskEvent::Retry) => Pending,

            (Pending, TaskEvent::Skip) => Skipped,

            // Readiness
            (Pending | Blocked, TaskEvent::Activate) => Pending,
            (Pending | Blocked, TaskEvent::Block) => Blocked,
            (Blocked, TaskEvent::Unblock) => Pending,

            (from_state, _) => return Err(invalid_transition(from_state, event.event_type())),
        };

        Ok(target)
    }

    fn check_guards(
        &self,
        current_state: TaskState,
        target_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<()> {
        match (current_state, target_state, event) {
            (TaskState::Failed, TaskState::Pending, TaskEvent::Retry) => {
                TaskCanBeRetriedGuard.check(&*self.task)?;
            }
            (_, TaskState::Skipped, TaskEvent::Skip) => {
                TaskIsOptionalGuard.check(&*self.task)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn apply(&mut self, target_state: TaskState, event: &TaskEvent) {
        let now = self.now;
        let task = &mut *self.task;

        match event {
            TaskEvent::Assign(assignee) => task.assigned_to = Some(assignee.clone()),
            TaskEvent::Start { started_by } => {
                task.started_at = Some(now);
                task.started_by = started_by.clone();
            }
            TaskEvent::Complete {
                result,
                completed_by,
            } => {
                task.completed_at = Some(now);
                task.completed_by = completed_by.clone();
                task.result = result.clone();
                task.retry_count = 0;
            }
            TaskEvent::Fail(error) => {
                task.completed_at = Some(now);
                task.error_message = Some(error.clone());
            }
            TaskEvent::Retry => {
                task.retry_count += 1;
                task.error_message = None;
                task.started_at = None;
                task.completed_at = None;
            }
            TaskEvent::Escalate { target, reason } => {
                task.is_escalated = true;
                task.escalated_at = Some(now);
                task.escalated_to_user = Some(target.clone());
                task.append_comment(&format!("Escalated: {reason}"));
            }
            TaskEvent::Skip => task.completed_at = Some(now),
            TaskEvent::Activate | TaskEvent::Block | TaskEvent::Unblock => {}
        }

        task.status = target_state;
        task.updated_at = now;
    }

    fn execute_actions(&self, record: &TransitionRecord) -> StateMachineResult<Vec<LifecycleEvent>> {
        let actions: Vec<Box<dyn StateAction<TaskInstance> + Send + Sync>> = vec![
            Box::new(PublishTransitionEventAction),
            Box::new(ErrorStateLoggingAction),
        ];

        let mut emitted = Vec::new();
        for action in actions {
            action.execute(&*self.task, record, &mut emitted)?;
        }
        Ok(emitted)
    }

    pub fn task(&self) -> &TaskInstance {
        &*self.task
    }
}
