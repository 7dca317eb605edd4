//! # Compensation Engine
//!
//! Saga-style undo for cancelled orders. Cancelling an order synthesizes
//! [`CompensationAction`]s; this module executes them, records the outcome on
//! each action and re-runs failed ones from a periodic sweep until their retry
//! budget is spent. Exhausted actions are reported, never dropped.
//!
//! Execution is idempotent per action: an action is re-read before its effect
//! runs and skipped once executed, a second worker reaching the same action
//! while it is in flight backs off, and every handler receives the action's
//! idempotency key for the downstream system.

use crate::clock::Clock;
use crate::config::CompensationConfig;
use crate::constants::ORDER_CANCELLED_TRIGGER;
use crate::error::{CarePathwayError, Result};
use crate::models::{CompensationAction, CompensationActionType, Order};
use crate::notification::{NotificationRequest, NotificationService, NotificationType};
use crate::repository::Repository;
use crate::state_machine::OrderState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Type-specific effect of a compensation action
#[async_trait]
pub trait CompensationHandler: Send + Sync + fmt::Debug {
    fn action_type(&self) -> CompensationActionType;

    /// Perform the effect; the returned text is stored as the execution result
    async fn execute(&self, action: &CompensationAction, order: &Order) -> Result<String>;
}

/// Asks billing to reverse the order's charge
#[derive(Debug, Default)]
pub struct ReverseChargeHandler {
    /// Idempotency keys already sent to billing, with the result returned then
    reversed: DashMap<String, String>,
}

#[async_trait]
impl CompensationHandler for ReverseChargeHandler {
    fn action_type(&self) -> CompensationActionType {
        CompensationActionType::ReverseCharge
    }

    async fn execute(&self, action: &CompensationAction, order: &Order) -> Result<String> {
        if let Some(previous) = self.reversed.get(&action.idempotency_key) {
            debug!(key = %action.idempotency_key, "Charge already reversed");
            return Ok(previous.value().clone());
        }

        let result = match order.estimated_cost_cents {
            Some(cents) => format!("Charges reversed successfully ({cents} cents)"),
            None => "Charges reversed successfully".to_string(),
        };
        info!(
            order_id = %order.order_id,
            idempotency_key = %action.idempotency_key,
            "Reversing charge for cancelled order"
        );
        self.reversed
            .insert(action.idempotency_key.clone(), result.clone());
        Ok(result)
    }
}

/// Tells the ordering department about the cancellation
#[derive(Debug)]
pub struct SendNotificationHandler {
    notifications: Arc<NotificationService>,
}

impl SendNotificationHandler {
    pub fn new(notifications: Arc<NotificationService>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl CompensationHandler for SendNotificationHandler {
    fn action_type(&self) -> CompensationActionType {
        CompensationActionType::SendNotification
    }

    async fn execute(&self, _action: &CompensationAction, order: &Order) -> Result<String> {
        let Some(recipient) = order
            .department_target
            .as_deref()
            .or(order.ordered_by.as_deref())
        else {
            return Ok("No department or ordering provider on order; nothing to notify".to_string());
        };

        let request = NotificationRequest::new(
            recipient,
            NotificationType::OrderCancelled,
            format!("Order cancelled: {}", order.description),
            format!(
                "{} order {} was cancelled: {}",
                order.order_type,
                order.order_id,
                order.cancellation_reason.as_deref().unwrap_or("no reason given")
            ),
        )
        .for_workflow(order.workflow_id)
        .for_order(order.order_id);

        let records = self.notifications.notify(request).await;
        if records.is_empty() {
            return Ok(format!("Notification to {recipient} suppressed by preferences"));
        }
        if records
            .iter()
            .all(|record| record.failure_reason.is_some())
        {
            return Err(CarePathwayError::external(
                "notification",
                format!("every channel to {recipient} failed"),
            ));
        }
        Ok(format!("Notification sent to {recipient}"))
    }
}

/// Tells the lab to stop processing and discard specimens
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyLabHandler;

#[async_trait]
impl CompensationHandler for NotifyLabHandler {
    fn action_type(&self) -> CompensationActionType {
        CompensationActionType::NotifyLab
    }

    async fn execute(&self, action: &CompensationAction, order: &Order) -> Result<String> {
        info!(
            order_id = %order.order_id,
            order_code = order.order_code.as_deref(),
            idempotency_key = %action.idempotency_key,
            "Notifying lab of cancelled order"
        );
        Ok("Lab notified of cancellation".to_string())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CancelOrderHandler;

#[async_trait]
impl CompensationHandler for CancelOrderHandler {
    fn action_type(&self) -> CompensationActionType {
        CompensationActionType::CancelOrder
    }

    async fn execute(&self, _action: &CompensationAction, order: &Order) -> Result<String> {
        if order.status != OrderState::Cancelled {
            return Err(CarePathwayError::conflict(format!(
                "Order {} is {} rather than CANCELLED",
                order.order_id, order.status
            )));
        }
        Ok("Order cancellation confirmed".to_string())
    }
}

/// Records action types without a dedicated integration for follow-up
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualFollowUpHandler;

#[async_trait]
impl CompensationHandler for ManualFollowUpHandler {
    fn action_type(&self) -> CompensationActionType {
        CompensationActionType::Custom
    }

    async fn execute(&self, action: &CompensationAction, order: &Order) -> Result<String> {
        info!(
            order_id = %order.order_id,
            action_type = %action.action_type,
            "Compensation recorded for manual follow-up"
        );
        Ok(format!("{} recorded for manual follow-up", action.action_type))
    }
}

/// Outcome counts of one execution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensationReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Already executed, out of retries, or running elsewhere
    pub skipped: usize,
}

impl CompensationReport {
    fn merge(&mut self, other: CompensationReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

enum Attempt {
    Succeeded,
    Failed,
    Skipped,
}

/// Removes the in-flight marker however the attempt ends
struct InFlight<'a> {
    actions: &'a DashMap<Uuid, ()>,
    action_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.actions.remove(&self.action_id);
    }
}

pub struct CompensationEngine {
    repository: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    config: CompensationConfig,
    handlers: HashMap<CompensationActionType, Arc<dyn CompensationHandler>>,
    fallback: Arc<dyn CompensationHandler>,
    in_flight: DashMap<Uuid, ()>,
    /// Exhausted actions already reported
    reported_exhausted: DashMap<Uuid, ()>,
}

impl fmt::Debug for CompensationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompensationEngine")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl CompensationEngine {
    /// Engine with the default handler set
    pub fn new(
        repository: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        config: CompensationConfig,
        notifications: Arc<NotificationService>,
    ) -> Self {
        let engine = Self {
            repository,
            clock,
            config,
            handlers: HashMap::new(),
            fallback: Arc::new(ManualFollowUpHandler),
            in_flight: DashMap::new(),
            reported_exhausted: DashMap::new(),
        };

        engine
            .with_handler(Arc::new(ReverseChargeHandler::default()))
            .with_handler(Arc::new(SendNotificationHandler::new(notifications)))
            .with_handler(Arc::new(NotifyLabHandler))
            .with_handler(Arc::new(CancelOrderHandler))
    }

    /// Register or replace the handler for its action type
    pub fn with_handler(mut self, handler: Arc<dyn CompensationHandler>) -> Self {
        self.handlers.insert(handler.action_type(), handler);
        self
    }

    fn handler_for(&self, action_type: CompensationActionType) -> Arc<dyn CompensationHandler> {
        self.handlers
            .get(&action_type)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Undo steps owed for an order cancelled from `previous` state.
    ///
    /// A charge is reversed only if the order had been authorized or
    /// activated; the department is always notified.
    pub fn plan(&self, order: &Order, previous: OrderState) -> Vec<CompensationAction> {
        let now = self.clock.now();
        let max_retries = self.config.default_max_retries;
        let mut actions = Vec::with_capacity(2);

        if matches!(previous, OrderState::Authorized | OrderState::Activated) {
            actions.push(CompensationAction::new(
                order.order_id,
                CompensationActionType::ReverseCharge,
                format!("Reverse charges for cancelled order: {}", order.order_id),
                ORDER_CANCELLED_TRIGGER,
                max_retries,
                now,
            ));
        }

        actions.push(CompensationAction::new(
            order.order_id,
            CompensationActionType::SendNotification,
            format!("Notify department of cancellation: {}", order.order_id),
            ORDER_CANCELLED_TRIGGER,
            max_retries,
            now,
        ));
        actions
    }

    /// Run every pending action of an order once
    pub async fn execute_pending(&self, order_id: Uuid) -> Result<CompensationReport> {
        let pending = self.repository.find_pending_compensations(order_id).await?;
        let mut report = CompensationReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        let order = self.repository.get_order(order_id).await?;
        for action in pending {
            report.attempted += 1;
            match self.execute_action(action.action_id, &order).await? {
                Attempt::Succeeded => report.succeeded += 1,
                Attempt::Failed => report.failed += 1,
                Attempt::Skipped => report.skipped += 1,
            }
        }

        info!(
            order_id = %order_id,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Compensation pass finished"
        );
        Ok(report)
    }

    async fn execute_action(&self, action_id: Uuid, order: &Order) -> Result<Attempt> {
        if self.in_flight.insert(action_id, ()).is_some() {
            debug!(action_id = %action_id, "Compensation already in flight");
            return Ok(Attempt::Skipped);
        }
        let _in_flight = InFlight {
            actions: &self.in_flight,
            action_id,
        };

        // Another pass may have finished it since the query
        let mut action = self.repository.get_compensation(action_id).await?;
        if !action.is_retryable() {
            return Ok(Attempt::Skipped);
        }

        let handler = self.handler_for(action.action_type);
        let outcome = handler.execute(&action, order).await;
        let now = self.clock.now();

        let attempt = match outcome {
            Ok(result) => {
                info!(
                    action_id = %action.action_id,
                    order_id = %action.order_id,
                    action_type = %action.action_type,
                    "Compensation executed"
                );
                action.record_success(result, now);
                Attempt::Succeeded
            }
            Err(error) => {
                action.record_failure(error.to_string(), now);
                warn!(
                    action_id = %action.action_id,
                    order_id = %action.order_id,
                    action_type = %action.action_type,
                    retry_count = action.retry_count,
                    max_retries = action.max_retries,
                    error = %error,
                    "Compensation failed"
                );
                if action.is_exhausted() {
                    self.reported_exhausted.insert(action.action_id, ());
                    warn!(
                        action_id = %action.action_id,
                        order_id = %action.order_id,
                        "Compensation exhausted its retries; manual intervention required"
                    );
                }
                Attempt::Failed
            }
        };

        self.repository.save_compensation(action).await?;
        Ok(attempt)
    }

    /// Re-run pending actions of every order that still has some
    pub async fn retry_sweep(&self) -> Result<CompensationReport> {
        let orders = self.repository.find_orders_with_pending_compensations().await?;
        let mut report = CompensationReport::default();

        for order_id in orders {
            match self.execute_pending(order_id).await {
                Ok(order_report) => report.merge(order_report),
                Err(error) => warn!(
                    order_id = %order_id,
                    error = %error,
                    "Compensation retry failed for order"
                ),
            }
        }
        Ok(report)
    }

    /// Actions that ran out of retries, as conditions needing a manual decision
    pub async fn exhausted_compensations(&self) -> Result<Vec<CarePathwayError>> {
        let exhausted = self.repository.find_exhausted_compensations().await?;
        Ok(exhausted.iter().map(exhausted_error).collect())
    }

    /// Exhausted actions not reported before, each logged once
    pub async fn report_newly_exhausted(&self) -> Result<Vec<CarePathwayError>> {
        let exhausted = self.repository.find_exhausted_compensations().await?;
        Ok(exhausted
            .iter()
            .filter(|action| self.reported_exhausted.insert(action.action_id, ()).is_none())
            .map(|action| {
                warn!(
                    action_id = %action.action_id,
                    order_id = %action.order_id,
                    action_type = %action.action_type,
                    error = action.error_message.as_deref(),
                    "Compensation exhausted"
                );
                exhausted_error(action)
            })
            .collect())
    }
}

fn exhausted_error(action: &CompensationAction) -> CarePathwayError {
    CarePathwayError::CompensationExhausted {
        action_id: action.action_id,
        order_id: action.order_id,
    }
}

/// Periodic actor driving [`CompensationEngine::retry_sweep`]
#[derive(Debug)]
pub struct CompensationRetrier {
    engine: Arc<CompensationEngine>,
    interval: std::time::Duration,
}

impl CompensationRetrier {
    pub fn new(engine: Arc<CompensationEngine>, interval: std::time::Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_seconds = self.interval.as_secs(), "Compensation retrier started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.engine.retry_sweep().await {
                        Ok(report) if report.attempted > 0 => info!(
                            attempted = report.attempted,
                            succeeded = report.succeeded,
                            failed = report.failed,
                            "Compensation retry sweep finished"
                        ),
                        Ok(_) => debug!("No compensations to retry"),
                        Err(error) => warn!(error = %error, "Compensation retry sweep failed"),
                    }
                    if let Err(error) = self.engine.report_newly_exhausted().await {
                        warn!(error = %error, "Could not list exhausted compensations");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Compensation retrier shutting down");
                        break;
                    }
                }
            }
        }
    }
}
