mod common;

use care_pathway::orchestration::{breach_reason, SlaMonitor};
use care_pathway::{Clock, TaskState};
use chrono::Duration;
use common::*;
use uuid::Uuid;

async fn admission(harness: &TestHarness) -> (Uuid, Vec<Uuid>) {
    let (template, _) = PathwayBuilder::new("Admission", t0())
        .task("Nursing assessment", "NURSE", 30)
        .task("Admission bloods", "LAB", 60)
        .task("Medication reconciliation", "PHARMACY", 120)
        .install(harness.repository.as_ref(), t0())
        .await;
    let workflow = harness
        .engine
        .create_workflow("MRN-4001", template.template_id)
        .await
        .unwrap();
    harness.settle().await;
    let tasks = harness
        .engine
        .workflow_tasks(workflow.workflow_id)
        .await
        .unwrap()
        .into_iter()
        .map(|task| task.task_id)
        .collect();
    (workflow.workflow_id, tasks)
}

#[tokio::test]
async fn test_overdue_task_is_flagged_and_escalated_once() {
    let harness = TestHarness::new();
    let (_, tasks) = admission(&harness).await;
    let monitor = SlaMonitor::new(harness.engine.clone());

    // Nothing is due yet
    harness.clock.advance_minutes(29);
    let report = monitor.run_cycle().await.unwrap();
    assert_eq!(report.checked, 0);

    harness.clock.set(t0() + Duration::minutes(31));
    let report = monitor.run_cycle().await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.breached, 1);
    assert_eq!(report.escalated, 1);
    assert_eq!(report.errors, 0);

    let task = harness.engine.get_task(tasks[0]).await.unwrap();
    assert!(task.sla_breached);
    assert!(task.is_escalated);
    assert_eq!(task.status, TaskState::Pending);
    assert_eq!(task.escalated_to_user.as_deref(), Some("NURSE_MANAGER"));
    assert!(task
        .comments
        .as_deref()
        .unwrap()
        .contains(&breach_reason(t0() + Duration::minutes(30), harness.clock.now())));

    harness.clock.set(t0() + Duration::minutes(36));
    let report = monitor.run_cycle().await.unwrap();
    assert_eq!(report.breached, 0);
    assert_eq!(report.escalated, 0);

    let events = harness.settle().await;
    assert_eq!(events.count("TASK_ESCALATED"), 1);
}

#[tokio::test]
async fn test_escalation_target_follows_role_prefix() {
    let harness = TestHarness::new();
    let (_, tasks) = admission(&harness).await;
    let monitor = SlaMonitor::new(harness.engine.clone());

    harness.clock.set(t0() + Duration::minutes(121));
    let report = monitor.run_cycle().await.unwrap();
    assert_eq!(report.breached, 3);

    let mut targets = Vec::new();
    for task_id in &tasks {
        let task = harness.engine.get_task(*task_id).await.unwrap();
        targets.push(task.escalated_to_user.unwrap());
    }
    assert_eq!(
        targets,
        vec!["NURSE_MANAGER", "LAB_DIRECTOR", "PHARMACY_MANAGER"]
    );
}

#[tokio::test]
async fn test_assignee_takes_precedence_over_role() {
    let harness = TestHarness::new();
    let (_, tasks) = admission(&harness).await;
    harness
        .engine
        .assign_task(tasks[1], "PHARMACY_TECH_07")
        .await
        .unwrap();

    harness.clock.set(t0() + Duration::minutes(61));
    SlaMonitor::new(harness.engine.clone())
        .run_cycle()
        .await
        .unwrap();

    let task = harness.engine.get_task(tasks[1]).await.unwrap();
    assert_eq!(task.escalated_to_user.as_deref(), Some("PHARMACY_MANAGER"));
}

#[tokio::test]
async fn test_already_escalated_task_is_only_flagged() {
    let harness = TestHarness::new();
    let (_, tasks) = admission(&harness).await;
    harness
        .engine
        .escalate_task(tasks[0], "CHARGE_NURSE", "Short staffed")
        .await
        .unwrap();
    harness.settle().await;

    harness.clock.set(t0() + Duration::minutes(45));
    let report = SlaMonitor::new(harness.engine.clone())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.breached, 1);
    assert_eq!(report.escalated, 0);

    let task = harness.engine.get_task(tasks[0]).await.unwrap();
    assert!(task.sla_breached);
    assert_eq!(task.escalated_to_user.as_deref(), Some("CHARGE_NURSE"));
    assert!(harness.settle().await.events.is_empty());
}

#[tokio::test]
async fn test_finished_tasks_never_breach() {
    let harness = TestHarness::new();
    let (_, tasks) = admission(&harness).await;
    harness.engine.start_task(tasks[0], None).await.unwrap();
    harness.engine.complete_task(tasks[0], None, None).await.unwrap();
    harness.engine.fail_task(tasks[1], "Patient refused").await.unwrap();

    harness.clock.set(t0() + Duration::minutes(90));
    let report = SlaMonitor::new(harness.engine.clone())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(report.breached, 0);
    assert!(!harness.engine.get_task(tasks[0]).await.unwrap().sla_breached);
}

#[tokio::test]
async fn test_breach_notifies_escalation_target() {
    let harness = TestHarness::new();
    harness.reachable_by_email("NURSE_MANAGER");
    admission(&harness).await;

    harness.clock.set(t0() + Duration::minutes(31));
    SlaMonitor::new(harness.engine.clone())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(
        harness.provider.subjects(),
        vec!["SLA breach: Nursing assessment".to_string()]
    );

    harness.settle().await;
    let sent = harness.provider.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .all(|message| message.recipient == "nurse_manager@hospital.test"));
    assert_eq!(sent[1].subject, "Task escalated");
}

#[tokio::test]
async fn test_batch_size_limits_a_cycle() {
    let mut config = care_pathway::EngineConfig::default();
    config.sla.batch_size = 2;
    let harness = TestHarness::with_config(config);
    admission(&harness).await;

    harness.clock.set(t0() + Duration::hours(3));
    let monitor = SlaMonitor::new(harness.engine.clone());
    let first = monitor.run_cycle().await.unwrap();
    assert_eq!(first.breached, 2);
    let second = monitor.run_cycle().await.unwrap();
    assert_eq!(second.breached, 1);
}
