use super::{
    actions::{ErrorStateLoggingAction, PublishTransitionEventAction, StateAction, TransitionRecord},
    errors::{invalid_transition, StateMachineResult},
    events::OrderEvent,
    states::OrderState,
    TransitionOutcome,
};
use crate::events::types::{EventContext, LifecycleEvent};
use crate::models::{Order, OrderType};
use chrono::{DateTime, Utc};
use tracing::debug;

/// State machine driving a clinical order
pub struct OrderStateMachine<'a> {
    order: &'a mut Order,
    now: DateTime<Utc>,
    context: EventContext,
}

impl<'a> OrderStateMachine<'a> {
    pub fn new(order: &'a mut Order, now: DateTime<Utc>, context: EventContext) -> Self {
        Self {
            order,
            now,
            context,
        }
    }

    pub fn current_state(&self) -> OrderState {
        self.order.status
    }

    /// Attempt to transition the order state
    pub fn transition(&mut self, event: OrderEvent) -> StateMachineResult<TransitionOutcome<OrderState>> {
        let current_state = self.current_state();
        let target_state =
            Self::determine_target_state(self.order.order_type, current_state, &event)?;

        self.apply(target_state, &event);

        let record = TransitionRecord {
            from: current_state.to_string(),
            to: target_state.to_string(),
            event_type: event.event_type(),
            detail: match &event {
                OrderEvent::Cancel(reason) => Some(reason.clone()),
                OrderEvent::Result(result) => Some(result.clone()),
                OrderEvent::Complete(result) => result.clone(),
                _ => None,
            },
            actor: match &event {
                OrderEvent::Authorize { authorized_by } => Some(authorized_by.clone()),
                OrderEvent::Verify { verified_by } => Some(verified_by.clone()),
                _ => None,
            },
            context: self.context,
            occurred_at: self.now,
        };

        debug!(
            order_id = %self.order.order_id,
            order_type = %self.order.order_type,
            from_state = %current_state,
            to_state = %target_state,
            "Order transition"
        );

        let events = self.execute_actions(&record)?;
        Ok(TransitionOutcome {
            from: current_state,
            to: target_state,
            events,
        })
    }

    /// Resolve the event's target and check it against the transition table
    pub fn determine_target_state(
        order_type: OrderType,
        current_state: OrderState,
        event: &OrderEvent,
    ) -> StateMachineResult<OrderState> {
        let target = match event {
            OrderEvent::Authorize { .. } => OrderState::Authorized,
            OrderEvent::Activate => OrderState::Activated,
            OrderEvent::Start => OrderState::InProgress,
            OrderEvent::Result(_) => order_type.result_state(),
            OrderEvent::Complete(_) => OrderState::Completed,
            OrderEvent::Verify { .. } => OrderState::Verified,
            OrderEvent::Close => OrderState::Closed,
            OrderEvent::Cancel(_) => OrderState::Cancelled,
        };

        if !current_state.can_transition_to(target) {
            return Err(invalid_transition(current_state, event.event_type()));
        }
        Ok(target)
    }

    fn apply(&mut self, target_state: OrderState, event: &OrderEvent) {
        let now = self.now;
        let order = &mut *self.order;

        match event {
            OrderEvent::Authorize { authorized_by } => {
                order.authorized_by = Some(authorized_by.clone());
                order.authorized_at = Some(now);
            }
            OrderEvent::Activate => order.activated_at = Some(now),
            OrderEvent::Start => order.started_at = Some(now),
            OrderEvent::Result(result) => {
                order.result = Some(result.clone());
                order.resulted_at = Some(now);
            }
            OrderEvent::Complete(result) => {
                if let Some(result) = result {
                    order.result = Some(result.clone());
                }
                order.resulted_at = Some(now);
            }
            OrderEvent::Verify { verified_by } => {
                order.verified_by = Some(verified_by.clone());
                order.verified_at = Some(now);
            }
            OrderEvent::Close => order.closed_at = Some(now),
            OrderEvent::Cancel(reason) => {
                order.cancelled_at = Some(now);
                order.cancellation_reason = Some(reason.clone());
            }
        }

        order.status = target_state;
        order.updated_at = now;
    }

    fn execute_actions(&self, record: &TransitionRecord) -> StateMachineResult<Vec<LifecycleEvent>> {
        let actions: Vec<Box<dyn StateAction<Order> + Send + Sync>> = vec![
            Box::new(PublishTransitionEventAction),
            Box::new(ErrorStateLoggingAction),
        ];

        let mut emitted = Vec::new();
        for action in actions {
            action.execute(&*self.order, record, &mut emitted)?;
        }
        Ok(emitted)
    }
}
