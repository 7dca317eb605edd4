//! Order lifecycle, auto-activation and compensation of cancelled orders

mod common;

use care_pathway::models::{CompensationAction, CompensationActionType, NewOrder, OrderType};
use care_pathway::orchestration::CompensationEngine;
use care_pathway::{CarePathwayError, OrderState, Repository};
use common::*;
use std::sync::Arc;
use uuid::Uuid;

async fn open_workflow(harness: &TestHarness) -> Uuid {
    let (template, _) = PathwayBuilder::new("Pneumonia", t0())
        .task("Chest x-ray", "RADIOLOGY", 60)
        .install(harness.repository.as_ref(), t0())
        .await;
    let workflow = harness
        .engine
        .create_workflow("MRN-2001", template.template_id)
        .await
        .unwrap();
    harness.settle().await;
    workflow.workflow_id
}

fn action_types(actions: &[CompensationAction]) -> Vec<CompensationActionType> {
    let mut types: Vec<_> = actions.iter().map(|a| a.action_type).collect();
    types.sort_by_key(|t| t.as_str());
    types
}

#[tokio::test]
async fn test_create_order_starts_proposed() {
    let harness = TestHarness::new();
    let workflow_id = open_workflow(&harness).await;

    let order = harness
        .engine
        .create_order(
            NewOrder::new(workflow_id, OrderType::LabTest, "Full blood count")
                .ordered_by("dr.bailey")
                .with_code("FBC"),
        )
        .await
        .unwrap();
    assert_eq!(order.status, OrderState::Proposed);
    assert_eq!(order.version, 1);
    assert_eq!(harness.bus.event_types(), vec!["ORDER_CREATED"]);
}

#[tokio::test]
async fn test_order_must_be_authorized_before_activation() {
    let harness = TestHarness::new();
    let workflow_id = open_workflow(&harness).await;
    let order = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::Procedure, "Lumbar puncture"))
        .await
        .unwrap();

    let error = harness.engine.activate_order(order.order_id).await.unwrap_err();
    assert!(matches!(error, CarePathwayError::Conflict(_)));
    assert_eq!(
        harness.engine.get_order(order.order_id).await.unwrap().status,
        OrderState::Proposed
    );

    harness
        .engine
        .authorize_order(order.order_id, "dr.bailey")
        .await
        .unwrap();
    let activated = harness.engine.activate_order(order.order_id).await.unwrap();
    assert_eq!(activated.status, OrderState::Activated);
    assert_eq!(activated.authorized_by.as_deref(), Some("dr.bailey"));
}

#[tokio::test]
async fn test_authorized_lab_orders_auto_activate() {
    let harness = TestHarness::new();
    let workflow_id = open_workflow(&harness).await;
    let lab = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::LabTest, "Lactate"))
        .await
        .unwrap();
    let medication = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::Medication, "Ceftriaxone 2g"))
        .await
        .unwrap();

    harness.engine.authorize_order(lab.order_id, "dr.bailey").await.unwrap();
    harness
        .engine
        .authorize_order(medication.order_id, "dr.bailey")
        .await
        .unwrap();
    let report = harness.settle().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    assert_eq!(
        harness.engine.get_order(lab.order_id).await.unwrap().status,
        OrderState::Activated
    );
    // Medication always waits for a manual activation
    assert_eq!(
        harness.engine.get_order(medication.order_id).await.unwrap().status,
        OrderState::Authorized
    );
    assert_eq!(report.count("ORDER_ACTIVATED"), 1);
}

#[tokio::test]
async fn test_full_order_lifecycle_and_progress() {
    let harness = TestHarness::new();
    let workflow_id = open_workflow(&harness).await;
    let medication = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::Medication, "Paracetamol 1g"))
        .await
        .unwrap();
    let other = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::Consultation, "Cardiology"))
        .await
        .unwrap();
    let id = medication.order_id;

    harness.engine.authorize_order(id, "dr.bailey").await.unwrap();
    harness.engine.activate_order(id).await.unwrap();
    harness.engine.start_order(id).await.unwrap();
    let dispensed = harness.engine.result_order(id, "given 10:00").await.unwrap();
    assert_eq!(dispensed.status, OrderState::Dispensed);

    let error = harness.engine.close_order(id).await.unwrap_err();
    assert!(matches!(error, CarePathwayError::Conflict(_)));

    harness.engine.verify_order(id, "pharm.chen").await.unwrap();
    let closed = harness.engine.close_order(id).await.unwrap();
    assert_eq!(closed.status, OrderState::Closed);
    assert_eq!(closed.verified_by.as_deref(), Some("pharm.chen"));

    let error = harness.engine.cancel_order(id, "too late").await.unwrap_err();
    assert!(matches!(error, CarePathwayError::Conflict(_)));

    let progress = harness.engine.workflow_progress(workflow_id).await.unwrap();
    assert_eq!(progress.total_orders, 2);
    assert_eq!(progress.order_percentage, 50);
    assert_eq!(
        harness.engine.get_order(other.order_id).await.unwrap().status,
        OrderState::Proposed
    );
}

#[tokio::test]
async fn test_cancelled_workflow_rejects_new_orders() {
    let harness = TestHarness::new();
    let workflow_id = open_workflow(&harness).await;
    harness
        .engine
        .cancel_workflow(workflow_id, "discharged")
        .await
        .unwrap();

    let error = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::Imaging, "CT abdomen"))
        .await
        .unwrap_err();
    assert!(matches!(error, CarePathwayError::Conflict(_)));
}

#[tokio::test]
async fn test_cancel_authorized_order_plans_reverse_charge_and_notification() {
    let harness = TestHarness::new();
    harness.reachable_by_email("CARDIOLOGY");
    let workflow_id = open_workflow(&harness).await;
    let order = harness
        .engine
        .create_order(
            NewOrder::new(workflow_id, OrderType::Procedure, "Echocardiogram")
                .for_department("CARDIOLOGY"),
        )
        .await
        .unwrap();
    harness.engine.authorize_order(order.order_id, "dr.bailey").await.unwrap();
    harness.settle().await;

    let cancelled = harness
        .engine
        .cancel_order(order.order_id, "patient declined")
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderState::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("patient declined"));
    assert!(cancelled.cancelled_at.is_some());

    let planned = harness.engine.order_compensations(order.order_id).await.unwrap();
    assert_eq!(
        action_types(&planned),
        vec![
            CompensationActionType::ReverseCharge,
            CompensationActionType::SendNotification
        ]
    );
    assert!(planned.iter().all(|action| !action.executed));

    let report = harness.settle().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.count("ORDER_CANCELLED"), 1);

    let executed = harness.engine.order_compensations(order.order_id).await.unwrap();
    assert!(executed.iter().all(|action| action.executed));
    assert!(executed
        .iter()
        .all(|action| action.execution_result.is_some()));
    assert_eq!(
        harness.provider.subjects(),
        vec!["Order cancelled: Echocardiogram".to_string()]
    );
}

#[tokio::test]
async fn test_cancel_proposed_order_only_notifies() {
    let harness = TestHarness::new();
    let workflow_id = open_workflow(&harness).await;
    let order = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::Imaging, "MRI brain"))
        .await
        .unwrap();

    harness
        .engine
        .cancel_order(order.order_id, "duplicate")
        .await
        .unwrap();
    let planned = harness.engine.order_compensations(order.order_id).await.unwrap();
    assert_eq!(
        action_types(&planned),
        vec![CompensationActionType::SendNotification]
    );
}

#[tokio::test]
async fn test_failed_compensation_is_retried_then_reported_exhausted() {
    let harness = TestHarness::new();
    harness.reachable_by_email("RADIOLOGY");
    let workflow_id = open_workflow(&harness).await;
    let order = harness
        .engine
        .create_order(
            NewOrder::new(workflow_id, OrderType::Imaging, "CT chest").for_department("RADIOLOGY"),
        )
        .await
        .unwrap();
    harness.settle().await;

    harness.provider.reject_all(true);
    harness.engine.cancel_order(order.order_id, "wrong patient").await.unwrap();
    let report = harness.settle().await;
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    let compensation = harness.engine.compensation();
    let action = &harness.engine.order_compensations(order.order_id).await.unwrap()[0];
    assert!(!action.executed);
    assert_eq!(action.retry_count, 1);
    assert!(action.error_message.as_deref().unwrap().contains("notification"));
    assert!(action.is_retryable());

    compensation.retry_sweep().await.unwrap();
    compensation.retry_sweep().await.unwrap();
    let action = &harness.engine.order_compensations(order.order_id).await.unwrap()[0];
    assert_eq!(action.retry_count, 3);
    assert!(!action.is_retryable());
    assert!(action.is_exhausted());

    // Out of retries: the sweep leaves it alone
    let idle = compensation.retry_sweep().await.unwrap();
    assert_eq!(idle.attempted, 0);

    let exhausted = compensation.exhausted_compensations().await.unwrap();
    assert_eq!(exhausted.len(), 1);
    assert!(matches!(
        exhausted[0],
        CarePathwayError::CompensationExhausted { order_id, .. } if order_id == order.order_id
    ));
}

#[tokio::test]
async fn test_compensation_succeeds_once_provider_recovers() {
    let harness = TestHarness::new();
    harness.reachable_by_email("LAB");
    let workflow_id = open_workflow(&harness).await;
    let order = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::LabTest, "INR").for_department("LAB"))
        .await
        .unwrap();

    harness.provider.reject_all(true);
    harness.engine.cancel_order(order.order_id, "repeat not needed").await.unwrap();
    harness.settle().await;

    harness.provider.reject_all(false);
    let report = harness
        .engine
        .execute_pending_compensations(order.order_id)
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);

    let action = &harness.engine.order_compensations(order.order_id).await.unwrap()[0];
    assert!(action.executed);
    assert_eq!(action.retry_count, 1);

    // Executed actions are never re-run
    let again = harness
        .engine
        .execute_pending_compensations(order.order_id)
        .await
        .unwrap();
    assert_eq!(again.attempted, 0);
}

#[tokio::test]
async fn test_custom_engine_handlers_are_used() {
    use async_trait::async_trait;
    use care_pathway::models::Order;
    use care_pathway::orchestration::CompensationHandler;

    #[derive(Debug)]
    struct BillingDown;

    #[async_trait]
    impl CompensationHandler for BillingDown {
        fn action_type(&self) -> CompensationActionType {
            CompensationActionType::ReverseCharge
        }

        async fn execute(
            &self,
            _action: &CompensationAction,
            _order: &Order,
        ) -> care_pathway::Result<String> {
            Err(CarePathwayError::external("billing", "offline"))
        }
    }

    let harness = TestHarness::new();
    let compensation = Arc::new(
        CompensationEngine::new(
            harness.repository.clone(),
            harness.clock.clone(),
            harness.engine.config().compensation.clone(),
            harness.notifications.clone(),
        )
        .with_handler(Arc::new(BillingDown)),
    );
    let workflow_id = open_workflow(&harness).await;
    let order = harness
        .engine
        .create_order(NewOrder::new(workflow_id, OrderType::Surgery, "Appendicectomy"))
        .await
        .unwrap();
    harness.engine.authorize_order(order.order_id, "dr.shepherd").await.unwrap();
    harness.engine.cancel_order(order.order_id, "resolved").await.unwrap();

    let report = compensation.execute_pending(order.order_id).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 1);

    let reverse = harness
        .repository
        .compensations_for_order(order.order_id)
        .await
        .unwrap()
        .into_iter()
        .find(|a| a.action_type == CompensationActionType::ReverseCharge)
        .unwrap();
    assert_eq!(
        reverse.error_message.as_deref(),
        Some("External delivery error: billing - offline")
    );
}
