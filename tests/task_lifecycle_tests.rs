//! Task commands through the engine

mod common;

use care_pathway::{CarePathwayError, Clock, TaskState};
use common::*;
use std::sync::Arc;
use tokio_test::assert_ok;
use uuid::Uuid;

async fn triage_workflow(harness: &TestHarness) -> Vec<Uuid> {
    let (template, _) = PathwayBuilder::new("Sepsis screen", t0())
        .task("Triage", "NURSE", 30)
        .task("Blood cultures", "LAB_TECH", 60)
        .install(harness.repository.as_ref(), t0())
        .await;
    let workflow = harness
        .engine
        .create_workflow("MRN-3001", template.template_id)
        .await
        .unwrap();
    harness.settle().await;
    harness
        .engine
        .workflow_tasks(workflow.workflow_id)
        .await
        .unwrap()
        .into_iter()
        .map(|task| task.task_id)
        .collect()
}

#[tokio::test]
async fn test_assign_only_while_pending() {
    let harness = TestHarness::new();
    let tasks = triage_workflow(&harness).await;

    let assigned = assert_ok!(harness.engine.assign_task(tasks[0], "nurse.joy").await);
    assert_eq!(assigned.assigned_to.as_deref(), Some("nurse.joy"));
    assert_eq!(assigned.required_role.as_deref(), Some("NURSE"));
    assert_eq!(assigned.status, TaskState::Pending);

    harness
        .engine
        .start_task(tasks[0], Some("nurse.joy".into()))
        .await
        .unwrap();
    let error = harness
        .engine
        .assign_task(tasks[0], "nurse.ratched")
        .await
        .unwrap_err();
    assert!(matches!(error, CarePathwayError::Conflict(_)));
}

#[tokio::test]
async fn test_start_and_complete_record_actors() {
    let harness = TestHarness::new();
    let tasks = triage_workflow(&harness).await;

    harness.clock.advance_minutes(5);
    let started = harness
        .engine
        .start_task(tasks[0], Some("nurse.joy".into()))
        .await
        .unwrap();
    assert_eq!(started.status, TaskState::InProgress);
    assert_eq!(started.started_by.as_deref(), Some("nurse.joy"));
    assert_eq!(started.started_at, Some(harness.clock.now()));

    harness.clock.advance_minutes(10);
    let completed = harness
        .engine
        .complete_task(tasks[0], Some("qSOFA 1".into()), Some("nurse.joy".into()))
        .await
        .unwrap();
    assert_eq!(completed.status, TaskState::Completed);
    assert_eq!(completed.result.as_deref(), Some("qSOFA 1"));
    assert_eq!(completed.completed_by.as_deref(), Some("nurse.joy"));
    assert!(completed.completed_at.unwrap() > completed.started_at.unwrap());
    assert_eq!(harness.bus.event_types(), vec!["TASK_STARTED", "TASK_COMPLETED"]);
}

#[tokio::test]
async fn test_invalid_commands_conflict_and_leave_task_unchanged() {
    let harness = TestHarness::new();
    let tasks = triage_workflow(&harness).await;
    let before = harness.engine.get_task(tasks[0]).await.unwrap();

    for error in [
        harness.engine.complete_task(tasks[0], None, None).await.unwrap_err(),
        harness.engine.retry_task(tasks[0]).await.unwrap_err(),
    ] {
        assert!(matches!(error, CarePathwayError::Conflict(_)), "{error}");
    }
    assert_eq!(harness.engine.get_task(tasks[0]).await.unwrap(), before);
    assert!(harness.bus.events().is_empty());

    let error = harness.engine.start_task(Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(error, CarePathwayError::NotFound { .. }));
}

#[tokio::test]
async fn test_manual_retry_clears_error() {
    let harness = TestHarness::new();
    let tasks = triage_workflow(&harness).await;

    harness.engine.start_task(tasks[1], None).await.unwrap();
    let failed = harness
        .engine
        .fail_task(tasks[1], "Specimen hemolyzed")
        .await
        .unwrap();
    assert_eq!(failed.status, TaskState::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("Specimen hemolyzed"));

    let retried = harness.engine.retry_task(tasks[1]).await.unwrap();
    assert_eq!(retried.status, TaskState::Pending);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.error_message, None);
}

#[tokio::test]
async fn test_escalation_notifies_target() {
    let harness = TestHarness::new();
    harness.reachable_by_email("CHARGE_NURSE");
    let tasks = triage_workflow(&harness).await;

    let escalated = harness
        .engine
        .escalate_task(tasks[0], "CHARGE_NURSE", "Patient deteriorating")
        .await
        .unwrap();
    assert!(escalated.is_escalated);
    assert_eq!(escalated.status, TaskState::Pending);
    assert_eq!(escalated.escalated_to_user.as_deref(), Some("CHARGE_NURSE"));
    assert!(escalated
        .comments
        .as_deref()
        .unwrap()
        .contains("Patient deteriorating"));

    let report = harness.settle().await;
    assert_eq!(report.event_types(), vec!["TASK_ESCALATED"]);

    let sent = harness.provider.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "charge_nurse@hospital.test");
    assert_eq!(sent[0].subject, "Task escalated");
    assert!(sent[0].body.contains("Patient deteriorating"));
}

#[tokio::test]
async fn test_escalating_finished_task_conflicts() {
    let harness = TestHarness::new();
    let tasks = triage_workflow(&harness).await;
    harness.engine.start_task(tasks[0], None).await.unwrap();
    harness.engine.complete_task(tasks[0], None, None).await.unwrap();

    let error = harness
        .engine
        .escalate_task(tasks[0], "SUPERVISOR", "late")
        .await
        .unwrap_err();
    assert!(matches!(error, CarePathwayError::Conflict(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completion_succeeds_once() {
    let harness = TestHarness::new();
    let tasks = triage_workflow(&harness).await;
    harness.engine.start_task(tasks[0], None).await.unwrap();

    let engine = Arc::clone(&harness.engine);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let task_id = tasks[0];
            tokio::spawn(async move {
                engine
                    .complete_task(task_id, Some(format!("result {i}")), None)
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(error) => assert!(matches!(error, CarePathwayError::Conflict(_)), "{error}"),
        }
    }
    assert_eq!(successes, 1);

    let task = harness.engine.get_task(tasks[0]).await.unwrap();
    assert_eq!(task.status, TaskState::Completed);
    assert_eq!(
        harness
            .bus
            .event_types()
            .iter()
            .filter(|t| **t == "TASK_COMPLETED")
            .count(),
        1
    );
}
