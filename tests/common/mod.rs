//! Shared fixtures for integration tests.
//!
//! The harness runs the engine over a `RecordingEventBus` and a
//! `ManualClock`, and feeds recorded events to the dispatcher by hand so
//! every propagation step is deterministic.

#![allow(dead_code)]

pub mod builders;
pub mod strategies;

pub use builders::*;

use async_trait::async_trait;
use care_pathway::config::EngineConfig;
use care_pathway::events::{LifecycleEvent, RecordingEventBus};
use care_pathway::notification::{
    NotificationChannel, NotificationPreference, NotificationProvider, NotificationService,
};
use care_pathway::orchestration::{CarePathwayEngine, EventDispatcher};
use care_pathway::models::{
    CompensationAction, Instruction, Order, TaskInstance, WorkflowInstance, WorkflowTemplate,
};
use care_pathway::{CarePathwayError, InMemoryRepository, ManualClock, Repository};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// 2024-03-01 08:00 UTC
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Provider that records every message and can be switched to reject them
#[derive(Debug, Default)]
pub struct RecordingProvider {
    sent: Mutex<Vec<SentMessage>>,
    rejecting: AtomicBool,
}

impl RecordingProvider {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.subject.clone()).collect()
    }

    pub fn reject_all(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> bool {
        if self.rejecting.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(SentMessage {
            channel,
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        true
    }
}

/// What one `settle` pass processed
#[derive(Debug, Default)]
pub struct SettleReport {
    pub events: Vec<LifecycleEvent>,
    pub errors: Vec<CarePathwayError>,
}

impl SettleReport {
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.iter().map(LifecycleEvent::event_type).collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }
}

pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub repository: Arc<dyn Repository>,
    pub bus: Arc<RecordingEventBus>,
    pub provider: Arc<RecordingProvider>,
    pub notifications: Arc<NotificationService>,
    pub engine: Arc<CarePathwayEngine>,
    pub dispatcher: EventDispatcher,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_repository(config, Arc::new(InMemoryRepository::new()))
    }

    pub fn with_repository(config: EngineConfig, repository: Arc<dyn Repository>) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let bus = Arc::new(RecordingEventBus::new());
        let provider = Arc::new(RecordingProvider::default());
        let notifications = Arc::new(NotificationService::new(
            provider.clone(),
            clock.clone(),
            config.notifications.clone(),
        ));
        let engine = Arc::new(CarePathwayEngine::new(
            repository.clone(),
            bus.clone(),
            clock.clone(),
            config,
            notifications.clone(),
        ));
        let dispatcher = EventDispatcher::new(engine.clone());

        Self {
            clock,
            repository,
            bus,
            provider,
            notifications,
            engine,
            dispatcher,
        }
    }

    /// Dispatch recorded events, including those published while
    /// dispatching, until the bus is quiet
    pub async fn settle(&self) -> SettleReport {
        let mut report = SettleReport::default();
        for _ in 0..1_000 {
            let deliveries = self.bus.drain();
            if deliveries.is_empty() {
                return report;
            }
            for delivery in deliveries {
                if let Err(error) = self.dispatcher.dispatch(&delivery.event).await {
                    report.errors.push(error);
                }
                report.events.push(delivery.event);
            }
        }
        panic!("event propagation did not quiesce");
    }

    /// Give `user_id` an email address so notifications reach the provider
    pub fn reachable_by_email(&self, user_id: &str) {
        self.notifications.set_preference(
            NotificationPreference::new(user_id).with_email(format!("{}@hospital.test", user_id.to_lowercase())),
        );
    }
}

/// In-memory store whose task saves start failing after a set number succeed
#[derive(Debug, Default)]
pub struct FaultyRepository {
    inner: InMemoryRepository,
    task_saves_left: AtomicUsize,
    faulty: AtomicBool,
}

impl FaultyRepository {
    /// Let `successes` more task saves through, then fail the rest
    pub fn fail_task_saves_after(&self, successes: usize) {
        self.task_saves_left.store(successes, Ordering::SeqCst);
        self.faulty.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Repository for FaultyRepository {
    async fn get_template(&self, template_id: Uuid) -> care_pathway::Result<WorkflowTemplate> {
        self.inner.get_template(template_id).await
    }

    async fn save_template(&self, template: WorkflowTemplate) -> care_pathway::Result<WorkflowTemplate> {
        self.inner.save_template(template).await
    }

    async fn get_workflow(&self, workflow_id: Uuid) -> care_pathway::Result<WorkflowInstance> {
        self.inner.get_workflow(workflow_id).await
    }

    async fn save_workflow(&self, workflow: WorkflowInstance) -> care_pathway::Result<WorkflowInstance> {
        self.inner.save_workflow(workflow).await
    }

    async fn get_task(&self, task_id: Uuid) -> care_pathway::Result<TaskInstance> {
        self.inner.get_task(task_id).await
    }

    async fn save_task(&self, task: TaskInstance) -> care_pathway::Result<TaskInstance> {
        if self.faulty.load(Ordering::SeqCst) {
            let allowed = self
                .task_saves_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(CarePathwayError::Internal("storage unavailable".into()));
            }
        }
        self.inner.save_task(task).await
    }

    async fn tasks_for_workflow(&self, workflow_id: Uuid) -> care_pathway::Result<Vec<TaskInstance>> {
        self.inner.tasks_for_workflow(workflow_id).await
    }

    async fn find_overdue_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> care_pathway::Result<Vec<TaskInstance>> {
        self.inner.find_overdue_tasks(now, limit).await
    }

    async fn get_order(&self, order_id: Uuid) -> care_pathway::Result<Order> {
        self.inner.get_order(order_id).await
    }

    async fn save_order(&self, order: Order) -> care_pathway::Result<Order> {
        self.inner.save_order(order).await
    }

    async fn orders_for_workflow(&self, workflow_id: Uuid) -> care_pathway::Result<Vec<Order>> {
        self.inner.orders_for_workflow(workflow_id).await
    }

    async fn save_compensation(&self, action: CompensationAction) -> care_pathway::Result<CompensationAction> {
        self.inner.save_compensation(action).await
    }

    async fn get_compensation(&self, action_id: Uuid) -> care_pathway::Result<CompensationAction> {
        self.inner.get_compensation(action_id).await
    }

    async fn compensations_for_order(&self, order_id: Uuid) -> care_pathway::Result<Vec<CompensationAction>> {
        self.inner.compensations_for_order(order_id).await
    }

    async fn find_pending_compensations(
        &self,
        order_id: Uuid,
    ) -> care_pathway::Result<Vec<CompensationAction>> {
        self.inner.find_pending_compensations(order_id).await
    }

    async fn find_exhausted_compensations(&self) -> care_pathway::Result<Vec<CompensationAction>> {
        self.inner.find_exhausted_compensations().await
    }

    async fn find_orders_with_pending_compensations(&self) -> care_pathway::Result<Vec<Uuid>> {
        self.inner.find_orders_with_pending_compensations().await
    }

    async fn get_instruction(&self, instruction_id: Uuid) -> care_pathway::Result<Instruction> {
        self.inner.get_instruction(instruction_id).await
    }

    async fn save_instruction(&self, instruction: Instruction) -> care_pathway::Result<Instruction> {
        self.inner.save_instruction(instruction).await
    }

    async fn instructions_for_workflow(&self, workflow_id: Uuid) -> care_pathway::Result<Vec<Instruction>> {
        self.inner.instructions_for_workflow(workflow_id).await
    }
}
