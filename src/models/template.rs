//! # Workflow Template
//!
//! Reusable definition of a clinical care pathway.
//!
//! ## Overview
//!
//! A `WorkflowTemplate` owns an ordered arena of `TaskDefinition`s. Definitions
//! reference each other by id through `next_task_id` (success path) and
//! `failure_task_id` (recovery path); decisions branch between two definitions.
//! Workflow instances are only ever created from a `PUBLISHED` template.
//!
//! ## Governance
//!
//! ```text
//! DRAFT -> IN_REVIEW -> APPROVED -> PUBLISHED
//!   any (except DEPRECATED) -> DEPRECATED
//! ```
//!
//! Publishing validates the task graph: every reference must resolve inside
//! the template and the success path must be acyclic. Once published a
//! template no longer accepts structural edits.

use crate::error::{CarePathwayError, Result};
use crate::models::decision::DecisionLogic;
use crate::models::Versioned;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateStatus {
    #[default]
    Draft,
    InReview,
    Approved,
    Published,
    Deprecated,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::InReview => "IN_REVIEW",
            Self::Approved => "APPROVED",
            Self::Published => "PUBLISHED",
            Self::Deprecated => "DEPRECATED",
        }
    }
}

impl fmt::Display for TemplateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a pathway as authored in a template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub definition_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Position inside the template, starting at 1
    pub order: u32,
    /// Role or user expected to perform the task
    pub assign_to: Option<String>,
    pub estimated_duration_minutes: u32,
    pub instructions: Option<String>,
    pub is_parallel: bool,
    pub is_optional: bool,
    pub next_task_id: Option<Uuid>,
    pub failure_task_id: Option<Uuid>,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition_id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            order: 0,
            assign_to: None,
            estimated_duration_minutes: 0,
            instructions: None,
            is_parallel: false,
            is_optional: false,
            next_task_id: None,
            failure_task_id: None,
        }
    }

    pub fn assigned_to(mut self, role: impl Into<String>) -> Self {
        self.assign_to = Some(role.into());
        self
    }

    pub fn duration_minutes(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = minutes;
        self
    }

    pub fn with_instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = Some(text.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn then(mut self, next: Uuid) -> Self {
        self.next_task_id = Some(next);
        self
    }

    pub fn on_failure(mut self, recovery: Uuid) -> Self {
        self.failure_task_id = Some(recovery);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub item_id: Uuid,
    pub sequence_number: u32,
    pub text: String,
    pub mandatory: bool,
    pub completed: bool,
    pub completed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_notes: Option<String>,
}

impl ChecklistItem {
    pub fn new(sequence_number: u32, text: impl Into<String>, mandatory: bool) -> Self {
        Self {
            item_id: Uuid::new_v4(),
            sequence_number,
            text: text.into(),
            mandatory,
            completed: false,
            completed_by: None,
            completed_at: None,
            completion_notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateType {
    Safety,
    Consent,
    Assessment,
    Clearance,
    Custom,
}

/// Checkpoint that must be satisfied before a pathway proceeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub gate_id: Uuid,
    pub name: String,
    pub gate_type: GateType,
    pub required: bool,
    pub is_open: bool,
    pub instructions: Option<String>,
    pub checklist: Vec<ChecklistItem>,
}

impl Gate {
    pub fn new(name: impl Into<String>, gate_type: GateType, required: bool) -> Self {
        Self {
            gate_id: Uuid::new_v4(),
            name: name.into(),
            gate_type,
            required,
            is_open: false,
            instructions: None,
            checklist: Vec::new(),
        }
    }

    pub fn add_item(&mut self, text: impl Into<String>, mandatory: bool) -> Uuid {
        let sequence = self.checklist.len() as u32 + 1;
        let item = ChecklistItem::new(sequence, text, mandatory);
        let id = item.item_id;
        self.checklist.push(item);
        id
    }

    pub fn complete_item(
        &mut self,
        item_id: Uuid,
        completed_by: impl Into<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let item = self
            .checklist
            .iter_mut()
            .find(|item| item.item_id == item_id)
            .ok_or_else(|| CarePathwayError::not_found("ChecklistItem", item_id))?;
        item.completed = true;
        item.completed_by = Some(completed_by.into());
        item.completed_at = Some(now);
        item.completion_notes = notes;
        Ok(())
    }

    /// Percentage of completed checklist items; 0 for an empty checklist
    pub fn completion_percentage(&self) -> u32 {
        if self.checklist.is_empty() {
            return 0;
        }
        let completed = self.checklist.iter().filter(|item| item.completed).count();
        (completed * 100 / self.checklist.len()) as u32
    }

    pub fn all_items_completed(&self) -> bool {
        self.checklist.iter().all(|item| item.completed)
    }
}

/// Reusable care pathway definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub template_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Governance revision, bumped on each publish
    pub template_version: u32,
    pub status: TemplateStatus,
    pub created_by: Option<String>,
    pub reviewed_by: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub task_definitions: Vec<TaskDefinition>,
    pub gates: Vec<Gate>,
    pub decisions: Vec<DecisionLogic>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl WorkflowTemplate {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            template_id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            category: None,
            template_version: 0,
            status: TemplateStatus::Draft,
            created_by: None,
            reviewed_by: None,
            approved_by: None,
            approved_at: None,
            published_at: None,
            task_definitions: Vec::new(),
            gates: Vec::new(),
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == TemplateStatus::Published
    }

    /// Order for the next added definition: max existing order + 1, or 1 when empty
    pub fn next_order(&self) -> u32 {
        self.task_definitions
            .iter()
            .map(|def| def.order)
            .max()
            .map_or(1, |max| max + 1)
    }

    pub fn task(&self, definition_id: Uuid) -> Option<&TaskDefinition> {
        self.task_definitions
            .iter()
            .find(|def| def.definition_id == definition_id)
    }

    pub fn decision(&self, decision_id: Uuid) -> Option<&DecisionLogic> {
        self.decisions
            .iter()
            .find(|decision| decision.decision_id == decision_id)
    }

    /// Append a definition, assigning its order. Returns the definition id.
    pub fn add_task(&mut self, mut definition: TaskDefinition) -> Result<Uuid> {
        self.ensure_editable()?;
        definition.order = self.next_order();
        let id = definition.definition_id;
        self.task_definitions.push(definition);
        Ok(id)
    }

    /// Point an existing definition's success path at another definition
    pub fn link(&mut self, from: Uuid, to: Uuid) -> Result<()> {
        self.ensure_editable()?;
        let definition = self
            .task_definitions
            .iter_mut()
            .find(|def| def.definition_id == from)
            .ok_or_else(|| CarePathwayError::not_found("TaskDefinition", from))?;
        definition.next_task_id = Some(to);
        Ok(())
    }

    pub fn add_gate(&mut self, gate: Gate) -> Result<Uuid> {
        self.ensure_editable()?;
        let id = gate.gate_id;
        self.gates.push(gate);
        Ok(id)
    }

    pub fn add_decision(&mut self, decision: DecisionLogic) -> Result<Uuid> {
        self.ensure_editable()?;
        let id = decision.decision_id;
        self.decisions.push(decision);
        Ok(id)
    }

    /// Evaluate a decision against the supplied facts and return the chosen definition id
    pub fn route(&self, decision_id: Uuid, facts: &HashMap<String, Value>) -> Result<Uuid> {
        let decision = self
            .decision(decision_id)
            .ok_or_else(|| CarePathwayError::not_found("DecisionLogic", decision_id))?;
        decision.route(facts)
    }

    pub fn submit_for_review(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.governance_step(TemplateStatus::Draft, TemplateStatus::InReview, now)
    }

    pub fn approve(&mut self, approved_by: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.governance_step(TemplateStatus::InReview, TemplateStatus::Approved, now)?;
        self.approved_by = Some(approved_by.into());
        self.approved_at = Some(now);
        Ok(())
    }

    /// Send a template under review back to draft
    pub fn reject(&mut self, reviewed_by: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.governance_step(TemplateStatus::InReview, TemplateStatus::Draft, now)?;
        self.reviewed_by = Some(reviewed_by.into());
        Ok(())
    }

    pub fn publish(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != TemplateStatus::Approved {
            return Err(CarePathwayError::conflict(format!(
                "Template {} cannot be published from {}",
                self.template_id, self.status
            )));
        }
        self.validate_graph()?;
        self.status = TemplateStatus::Published;
        self.template_version += 1;
        self.published_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn deprecate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status == TemplateStatus::Deprecated {
            return Err(CarePathwayError::conflict(format!(
                "Template {} is already deprecated",
                self.template_id
            )));
        }
        self.status = TemplateStatus::Deprecated;
        self.updated_at = now;
        Ok(())
    }

    /// Check that every reference resolves inside this template and the success path is acyclic
    pub fn validate_graph(&self) -> Result<()> {
        if self.task_definitions.is_empty() {
            return Err(CarePathwayError::validation(format!(
                "Template '{}' has no task definitions",
                self.name
            )));
        }

        let known: HashSet<Uuid> = self
            .task_definitions
            .iter()
            .map(|def| def.definition_id)
            .collect();

        for def in &self.task_definitions {
            for (label, target) in [("next", def.next_task_id), ("failure", def.failure_task_id)] {
                if let Some(target) = target {
                    if !known.contains(&target) {
                        return Err(CarePathwayError::validation(format!(
                            "Task '{}' has {label} reference {target} outside the template",
                            def.name
                        )));
                    }
                }
            }
        }

        for decision in &self.decisions {
            for target in [decision.true_path_task_id, decision.false_path_task_id] {
                if !known.contains(&target) {
                    return Err(CarePathwayError::validation(format!(
                        "Decision '{}' routes to {target} outside the template",
                        decision.name
                    )));
                }
            }
        }

        self.ensure_acyclic()
    }

    fn ensure_acyclic(&self) -> Result<()> {
        let next: HashMap<Uuid, Uuid> = self
            .task_definitions
            .iter()
            .filter_map(|def| def.next_task_id.map(|n| (def.definition_id, n)))
            .collect();

        // Each node has at most one successor, so walking from every start finds any cycle
        let mut cleared: HashSet<Uuid> = HashSet::new();
        for def in &self.task_definitions {
            let mut on_path: HashSet<Uuid> = HashSet::new();
            let mut cursor = Some(def.definition_id);
            while let Some(id) = cursor {
                if cleared.contains(&id) {
                    break;
                }
                if !on_path.insert(id) {
                    let name = self.task(id).map_or("?", |d| d.name.as_str());
                    return Err(CarePathwayError::validation(format!(
                        "Task graph of '{}' has a cycle through '{name}'",
                        self.name
                    )));
                }
                cursor = next.get(&id).copied();
            }
            cleared.extend(on_path);
        }
        Ok(())
    }

    fn ensure_editable(&self) -> Result<()> {
        match self.status {
            TemplateStatus::Draft => Ok(()),
            other => Err(CarePathwayError::conflict(format!(
                "Template {} is {other} and cannot be modified",
                self.template_id
            ))),
        }
    }

    fn governance_step(
        &mut self,
        from: TemplateStatus,
        to: TemplateStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != from {
            return Err(CarePathwayError::conflict(format!(
                "Template {} cannot move from {} to {to}",
                self.template_id, self.status
            )));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}

impl Versioned for WorkflowTemplate {
    const ENTITY: &'static str = "WorkflowTemplate";

    fn id(&self) -> Uuid {
        self.template_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
