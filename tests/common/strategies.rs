use care_pathway::models::{DecisionOperator, OrderType};
use care_pathway::state_machine::{OrderEvent, OrderState};
use proptest::prelude::*;
use proptest::strategy::Just;

/// Strategy for generating order types
pub fn order_type_strategy() -> impl Strategy<Value = OrderType> {
    prop_oneof![
        Just(OrderType::LabTest),
        Just(OrderType::Imaging),
        Just(OrderType::Procedure),
        Just(OrderType::Medication),
        Just(OrderType::ControlledSubstance),
        Just(OrderType::Surgery),
        Just(OrderType::Consultation),
        Just(OrderType::Appointment),
        Just(OrderType::SupplyRequest),
        Just(OrderType::Equipment),
        Just(OrderType::Custom),
    ]
}

/// Strategy for generating any order command
pub fn order_event_strategy() -> impl Strategy<Value = OrderEvent> {
    prop_oneof![
        "[a-z]{3,8}".prop_map(|authorized_by| OrderEvent::Authorize { authorized_by }),
        Just(OrderEvent::Activate),
        Just(OrderEvent::Start),
        "[a-z ]{1,16}".prop_map(OrderEvent::Result),
        prop::option::of("[a-z ]{1,16}").prop_map(OrderEvent::Complete),
        "[a-z]{3,8}".prop_map(|verified_by| OrderEvent::Verify { verified_by }),
        Just(OrderEvent::Close),
        "[a-z ]{1,16}".prop_map(OrderEvent::Cancel),
    ]
}

/// Strategy for generating command sequences against one order
pub fn order_event_sequence_strategy() -> impl Strategy<Value = Vec<OrderEvent>> {
    prop::collection::vec(order_event_strategy(), 1..12)
}

pub fn order_state_strategy() -> impl Strategy<Value = OrderState> {
    prop_oneof![
        Just(OrderState::Proposed),
        Just(OrderState::Authorized),
        Just(OrderState::Activated),
        Just(OrderState::InProgress),
        Just(OrderState::Resulted),
        Just(OrderState::Dispensed),
        Just(OrderState::Completed),
        Just(OrderState::Verified),
        Just(OrderState::Closed),
        Just(OrderState::Cancelled),
    ]
}

/// Strategy for a pathway: one optional flag per task
pub fn optional_flags_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..6)
}

/// Strategy for an order in which to finish `n` tasks
pub fn completion_order_strategy(n: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..n).collect::<Vec<_>>()).prop_shuffle()
}

/// Pathway shape plus the order its tasks are finished in
pub fn pathway_run_strategy() -> impl Strategy<Value = (Vec<bool>, Vec<usize>, Vec<bool>)> {
    optional_flags_strategy().prop_flat_map(|flags| {
        let n = flags.len();
        (
            Just(flags),
            completion_order_strategy(n),
            // Whether an optional task is skipped instead of completed
            prop::collection::vec(any::<bool>(), n),
        )
    })
}

pub fn numeric_operator_strategy() -> impl Strategy<Value = DecisionOperator> {
    prop_oneof![
        Just(DecisionOperator::GreaterThan),
        Just(DecisionOperator::LessThan),
        Just(DecisionOperator::GreaterThanOrEqual),
        Just(DecisionOperator::LessThanOrEqual),
    ]
}

pub fn any_operator_strategy() -> impl Strategy<Value = DecisionOperator> {
    prop_oneof![
        Just(DecisionOperator::Equals),
        Just(DecisionOperator::NotEquals),
        Just(DecisionOperator::Contains),
        Just(DecisionOperator::NotContains),
        Just(DecisionOperator::In),
        Just(DecisionOperator::NotIn),
        Just(DecisionOperator::IsNull),
        Just(DecisionOperator::IsNotNull),
        numeric_operator_strategy(),
    ]
}
