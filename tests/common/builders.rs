//! Template builders for integration tests

use care_pathway::models::{TaskDefinition, WorkflowTemplate};
use care_pathway::Repository;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Drive a draft template through review to PUBLISHED
pub fn publish(template: &mut WorkflowTemplate, now: DateTime<Utc>) {
    template.submit_for_review(now).unwrap();
    template.approve("dr.grey", now).unwrap();
    template.publish(now).unwrap();
}

/// Builder for templates whose tasks form a single success chain
pub struct PathwayBuilder {
    template: WorkflowTemplate,
    ids: Vec<Uuid>,
}

impl PathwayBuilder {
    pub fn new(name: &str, now: DateTime<Utc>) -> Self {
        Self {
            template: WorkflowTemplate::new(name, now),
            ids: Vec::new(),
        }
    }

    /// Append a required task linked after the previous one
    pub fn task(self, name: &str, role: &str, minutes: u32) -> Self {
        self.push(TaskDefinition::new(name).assigned_to(role).duration_minutes(minutes))
    }

    pub fn optional_task(self, name: &str, role: &str, minutes: u32) -> Self {
        self.push(
            TaskDefinition::new(name)
                .assigned_to(role)
                .duration_minutes(minutes)
                .optional(),
        )
    }

    /// Append a definition without linking it into the chain
    pub fn detached(mut self, definition: TaskDefinition) -> Self {
        let id = self.template.add_task(definition).unwrap();
        self.ids.push(id);
        self
    }

    fn push(mut self, definition: TaskDefinition) -> Self {
        let id = self.template.add_task(definition).unwrap();
        if let Some(previous) = self.ids.last().copied() {
            self.template.link(previous, id).unwrap();
        }
        self.ids.push(id);
        self
    }

    /// Definition ids in insertion order
    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    pub fn template_mut(&mut self) -> &mut WorkflowTemplate {
        &mut self.template
    }

    pub fn build(self, now: DateTime<Utc>) -> (WorkflowTemplate, Vec<Uuid>) {
        let mut template = self.template;
        publish(&mut template, now);
        (template, self.ids)
    }

    /// Publish and store the template
    pub async fn install(
        self,
        repository: &dyn Repository,
        now: DateTime<Utc>,
    ) -> (WorkflowTemplate, Vec<Uuid>) {
        let (template, ids) = self.build(now);
        let template = repository.save_template(template).await.unwrap();
        (template, ids)
    }
}
