use super::{
    actions::{
        ErrorStateLoggingAction, PublishTransitionEventAction, StateAction, TransitionRecord,
        WorkflowCompletionAction,
    },
    errors::{invalid_transition, StateMachineResult},
    events::WorkflowEvent,
    guards::{AllRequiredTasksCompleteGuard, StateGuard},
    states::{TaskState, WorkflowState},
    TransitionOutcome,
};
use crate::events::types::{EventContext, LifecycleEvent};
use crate::models::{TaskInstance, WorkflowInstance};
use chrono::{DateTime, Utc};
use tracing::debug;

/// State machine driving a workflow instance.
///
/// Holds a read-only view of the workflow's tasks for the completion guard.
pub struct WorkflowStateMachine<'a> {
    workflow: &'a mut WorkflowInstance,
    tasks: &'a [TaskInstance],
    now: DateTime<Utc>,
    context: EventContext,
}

impl<'a> WorkflowStateMachine<'a> {
    pub fn new(
        workflow: &'a mut WorkflowInstance,
        tasks: &'a [TaskInstance],
        now: DateTime<Utc>,
        context: EventContext,
    ) -> Self {
        Self {
            workflow,
            tasks,
            now,
            context,
        }
    }

    pub fn current_state(&self) -> WorkflowState {
        self.workflow.status
    }

    /// Attempt to transition the workflow state
    pub fn transition(
        &mut self,
        event: WorkflowEvent,
    ) -> StateMachineResult<TransitionOutcome<WorkflowState>> {
        let current_state = self.current_state();
        let target_state = Self::determine_target_state(current_state, &event)?;

        if target_state == WorkflowState::Completed {
            AllRequiredTasksCompleteGuard.check(self.tasks)?;
        }

        self.apply(target_state, &event);

        let record = TransitionRecord {
            from: current_state.to_string(),
            to: target_state.to_string(),
            event_type: event.event_type(),
            detail: event.reason().map(str::to_string),
            actor: None,
            context: self.context,
            occurred_at: self.now,
        };

        debug!(
            workflow_id = %self.workflow.workflow_id,
            from_state = %current_state,
            to_state = %target_state,
            event = event.event_type(),
            "Workflow transition"
        );

        let events = self.execute_actions(&record)?;
        Ok(TransitionOutcome {
            from: current_state,
            to: target_state,
            events,
        })
    }

    pub fn determine_target_state(
        current_state: WorkflowState,
        event: &WorkflowEvent,
    ) -> StateMachineResult<WorkflowState> {
        use WorkflowState::*;

        let target = match (current_state, event) {
            (Draft, WorkflowEvent::Start) => Active,
            (Active, WorkflowEvent::Pause) => Paused,
            (Paused, WorkflowEvent::Resume) => Active,
            (Active, WorkflowEvent::Complete) => Completed,
            (Active, WorkflowEvent::Fail(_)) => Failed,
            (Active | Paused, WorkflowEvent::Cancel(_)) => Cancelled,
            // Escalation is a flag, failed workflows are escalated for review
            (state, WorkflowEvent::Escalate(_)) => state,
            (from_state, _) => return Err(invalid_transition(from_state, event.event_type())),
        };

        Ok(target)
    }

    fn apply(&mut self, target_state: WorkflowState, event: &WorkflowEvent) {
        let now = self.now;
        let workflow = &mut *self.workflow;

        match event {
            WorkflowEvent::Start => workflow.started_at = Some(now),
            WorkflowEvent::Complete | WorkflowEvent::Fail(_) => workflow.completed_at = Some(now),
            WorkflowEvent::Cancel(reason) => {
                workflow.notes = Some(reason.clone());
                workflow.completed_at = Some(now);
            }
            WorkflowEvent::Escalate(reason) => {
                workflow.is_escalated = true;
                workflow.escalation_reason = Some(reason.clone());
                workflow.escalated_at = Some(now);
            }
            WorkflowEvent::Pause | WorkflowEvent::Resume => {}
        }

        workflow.status = target_state;
        workflow.updated_at = now;
    }

    fn execute_actions(&self, record: &TransitionRecord) -> StateMachineResult<Vec<LifecycleEvent>> {
        let actions: Vec<Box<dyn StateAction<WorkflowInstance> + Send + Sync>> = vec![
            Box::new(PublishTransitionEventAction),
            Box::new(ErrorStateLoggingAction),
            Box::new(WorkflowCompletionAction),
        ];

        let mut emitted = Vec::new();
        for action in actions {
            action.execute(&*self.workflow, record, &mut emitted)?;
        }
        Ok(emitted)
    }
}

/// Decide whether a workflow's tasks have settled it.
///
/// A required task that failed with no retry budget and no recovery path
/// fails the workflow. Once every task has settled the workflow completes
/// when all required tasks completed, and fails otherwise. Returns `None`
/// while work is still outstanding.
pub fn settle_event<F>(tasks: &[TaskInstance], has_recovery_path: F) -> Option<WorkflowEvent>
where
    F: Fn(&TaskInstance) -> bool,
{
    if tasks.is_empty() {
        return None;
    }

    if let Some(failed) = tasks.iter().find(|task| {
        !task.is_optional
            && task.status == TaskState::Failed
            && !task.is_retryable()
            && !has_recovery_path(task)
    }) {
        return Some(WorkflowEvent::Fail(format!(
            "Required task '{}' failed: {}",
            failed.name,
            failed.error_message.as_deref().unwrap_or("no error recorded")
        )));
    }

    let settled = tasks.iter().all(|task| match task.status {
        TaskState::Completed | TaskState::Skipped => true,
        TaskState::Failed => !task.is_retryable(),
        _ => false,
    });
    if !settled {
        return None;
    }

    let required_done = tasks
        .iter()
        .all(|task| task.is_optional || task.status == TaskState::Completed);
    Some(if required_done {
        WorkflowEvent::Complete
    } else {
        WorkflowEvent::Fail("Required tasks did not complete".to_string())
    })
}
