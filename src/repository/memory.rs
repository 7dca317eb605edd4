use super::Repository;
use crate::error::{CarePathwayError, Result};
use crate::models::{
    CompensationAction, Instruction, Order, TaskInstance, Versioned, WorkflowInstance,
    WorkflowTemplate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Single-table store with compare-and-swap writes
#[derive(Debug)]
struct Table<E: Versioned> {
    rows: DashMap<Uuid, E>,
}

impl<E: Versioned> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }
}

impl<E: Versioned> Table<E> {
    fn get(&self, id: Uuid) -> Result<E> {
        self.rows
            .get(&id)
            .map(|row| row.value().clone())
            .ok_or_else(|| CarePathwayError::not_found(E::ENTITY, id))
    }

    fn save(&self, mut entity: E) -> Result<E> {
        let id = entity.id();
        let expected = entity.version();

        match self.rows.entry(id) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get().version();
                if stored != expected {
                    return Err(CarePathwayError::conflict(format!(
                        "Stale write to {} {id}: expected version {expected}, stored {stored}",
                        E::ENTITY
                    )));
                }
                entity.set_version(stored + 1);
                occupied.insert(entity.clone());
            }
            Entry::Vacant(vacant) => {
                if expected != 0 {
                    return Err(CarePathwayError::conflict(format!(
                        "{} {id} was deleted or never stored (version {expected})",
                        E::ENTITY
                    )));
                }
                entity.set_version(1);
                vacant.insert(entity.clone());
            }
        }
        Ok(entity)
    }

    fn filter<F>(&self, predicate: F) -> Vec<E>
    where
        F: Fn(&E) -> bool,
    {
        self.rows
            .iter()
            .filter(|row| predicate(row.value()))
            .map(|row| row.value().clone())
            .collect()
    }
}

/// Repository held entirely in memory.
///
/// Suitable for tests and single-process deployments; all maps are sharded
/// `DashMap`s so concurrent commands on different entities do not contend.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    templates: Table<WorkflowTemplate>,
    workflows: Table<WorkflowInstance>,
    tasks: Table<TaskInstance>,
    orders: Table<Order>,
    compensations: Table<CompensationAction>,
    instructions: Table<Instruction>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_template(&self, template_id: Uuid) -> Result<WorkflowTemplate> {
        self.templates.get(template_id)
    }

    async fn save_template(&self, template: WorkflowTemplate) -> Result<WorkflowTemplate> {
        self.templates.save(template)
    }

    async fn get_workflow(&self, workflow_id: Uuid) -> Result<WorkflowInstance> {
        self.workflows.get(workflow_id)
    }

    async fn save_workflow(&self, workflow: WorkflowInstance) -> Result<WorkflowInstance> {
        self.workflows.save(workflow)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<TaskInstance> {
        self.tasks.get(task_id)
    }

    async fn save_task(&self, task: TaskInstance) -> Result<TaskInstance> {
        self.tasks.save(task)
    }

    async fn tasks_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<TaskInstance>> {
        let mut tasks = self.tasks.filter(|task| task.workflow_id == workflow_id);
        tasks.sort_by_key(|task| (task.created_at, task.sequence, task.task_id));
        Ok(tasks)
    }

    async fn find_overdue_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<TaskInstance>> {
        let mut overdue = self.tasks.filter(|task| task.is_sla_candidate(now));
        overdue.sort_by_key(|task| task.due_at);
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.get(order_id)
    }

    async fn save_order(&self, order: Order) -> Result<Order> {
        self.orders.save(order)
    }

    async fn orders_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Order>> {
        let mut orders = self.orders.filter(|order| order.workflow_id == workflow_id);
        orders.sort_by_key(|order| (order.created_at, order.order_id));
        Ok(orders)
    }

    async fn save_compensation(&self, action: CompensationAction) -> Result<CompensationAction> {
        self.compensations.save(action)
    }

    async fn get_compensation(&self, action_id: Uuid) -> Result<CompensationAction> {
        self.compensations.get(action_id)
    }

    async fn compensations_for_order(&self, order_id: Uuid) -> Result<Vec<CompensationAction>> {
        let mut actions = self.compensations.filter(|action| action.order_id == order_id);
        actions.sort_by_key(|action| (action.created_at, action.action_id));
        Ok(actions)
    }

    async fn find_pending_compensations(&self, order_id: Uuid) -> Result<Vec<CompensationAction>> {
        let mut actions = self
            .compensations
            .filter(|action| action.order_id == order_id && action.is_retryable());
        actions.sort_by_key(|action| (action.created_at, action.action_id));
        Ok(actions)
    }

    async fn find_exhausted_compensations(&self) -> Result<Vec<CompensationAction>> {
        Ok(self.compensations.filter(CompensationAction::is_exhausted))
    }

    async fn find_orders_with_pending_compensations(&self) -> Result<Vec<Uuid>> {
        let orders: BTreeSet<Uuid> = self
            .compensations
            .filter(CompensationAction::is_retryable)
            .into_iter()
            .map(|action| action.order_id)
            .collect();
        Ok(orders.into_iter().collect())
    }

    async fn get_instruction(&self, instruction_id: Uuid) -> Result<Instruction> {
        self.instructions.get(instruction_id)
    }

    async fn save_instruction(&self, instruction: Instruction) -> Result<Instruction> {
        self.instructions.save(instruction)
    }

    async fn instructions_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Instruction>> {
        let mut instructions = self
            .instructions
            .filter(|instruction| instruction.workflow_id == workflow_id);
        instructions.sort_by_key(|instruction| (instruction.created_at, instruction.instruction_id));
        Ok(instructions)
    }
}
