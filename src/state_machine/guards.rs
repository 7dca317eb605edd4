use super::errors::{business_rule_violation, dependencies_not_met, GuardResult};
use super::states::TaskState;
use crate::models::{TaskInstance, WorkflowTemplate};

/// Trait for implementing state transition guards
pub trait StateGuard<T: ?Sized> {
    /// Check if a transition is allowed
    fn check(&self, entity: &T) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Guard to check a failed task still has retry budget
pub struct TaskCanBeRetriedGuard;

impl StateGuard<TaskInstance> for TaskCanBeRetriedGuard {
    fn check(&self, task: &TaskInstance) -> GuardResult<()> {
        if task.retry_count >= task.max_retries {
            return Err(business_rule_violation(format!(
                "Task {} exhausted its retries ({}/{})",
                task.task_id, task.retry_count, task.max_retries
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Task must have retries remaining"
    }
}

/// Guard to check only optional tasks are skipped
pub struct TaskIsOptionalGuard;

impl StateGuard<TaskInstance> for TaskIsOptionalGuard {
    fn check(&self, task: &TaskInstance) -> GuardResult<()> {
        if !task.is_optional {
            return Err(business_rule_violation(format!(
                "Task {} is required and cannot be skipped",
                task.task_id
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Task must be optional to be skipped"
    }
}

/// Guard to check every required task completed before the workflow completes
pub struct AllRequiredTasksCompleteGuard;

impl StateGuard<[TaskInstance]> for AllRequiredTasksCompleteGuard {
    fn check(&self, tasks: &[TaskInstance]) -> GuardResult<()> {
        let incomplete: Vec<&str> = tasks
            .iter()
            .filter(|task| !task.is_optional && task.status != TaskState::Completed)
            .map(|task| task.name.as_str())
            .collect();

        if !incomplete.is_empty() {
            return Err(dependencies_not_met(format!(
                "{} required task(s) not completed: {}",
                incomplete.len(),
                incomplete.join(", ")
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "All required tasks must be completed"
    }
}

/// Guard to check instances are only created from published templates
pub struct TemplatePublishedGuard;

impl StateGuard<WorkflowTemplate> for TemplatePublishedGuard {
    fn check(&self, template: &WorkflowTemplate) -> GuardResult<()> {
        if !template.is_published() {
            return Err(business_rule_violation(format!(
                "Template '{}' is {} and cannot be instantiated",
                template.name, template.status
            )));
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Template must be published"
    }
}
