//! End-to-end runs over the partitioned bus with live dispatcher workers

mod common;

use care_pathway::orchestration::{BootstrapConfig, EngineBootstrap, EngineSystem};
use care_pathway::{InMemoryRepository, ManualClock, TaskState, WorkflowState};
use common::*;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

async fn start(dir: &TempDir) -> (EngineSystem, Arc<RecordingProvider>) {
    let provider = Arc::new(RecordingProvider::default());
    let system = EngineBootstrap::bootstrap_with(
        BootstrapConfig {
            config_directory: Some(dir.path().to_path_buf()),
            environment_override: Some("test".to_string()),
        },
        Arc::new(InMemoryRepository::new()),
        provider.clone(),
        Arc::new(ManualClock::new(t0())),
    )
    .await
    .unwrap();
    (system, provider)
}

/// Poll until the workflow reaches `expected` or give up after two seconds
async fn wait_for_status(system: &EngineSystem, workflow_id: Uuid, expected: WorkflowState) -> WorkflowState {
    let mut status = system.engine().get_workflow(workflow_id).await.unwrap().status;
    for _ in 0..100 {
        if status == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = system.engine().get_workflow(workflow_id).await.unwrap().status;
    }
    status
}

async fn wait_for_task(system: &EngineSystem, task_id: Uuid, expected: TaskState) -> TaskState {
    let mut status = system.engine().get_task(task_id).await.unwrap().status;
    for _ in 0..100 {
        if status == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = system.engine().get_task(task_id).await.unwrap().status;
    }
    status
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pathway_completes_over_live_bus() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("test.toml"),
        "[dispatcher]\nworker_count = 2\n\n[sla]\ncheck_interval_seconds = 3600\n",
    )
    .unwrap();
    let (system, _) = start(&dir).await;
    assert!(system.is_running());
    assert_eq!(system.bus().partition_count(), 2);

    let (template, _) = PathwayBuilder::new("Chest pain", t0())
        .task("ECG", "NURSE", 10)
        .task("Troponin", "LAB", 60)
        .build(t0());
    let template = system.engine().save_template(template).await.unwrap();
    let workflow = system
        .engine()
        .create_workflow("MRN-7001", template.template_id)
        .await
        .unwrap();
    let tasks = system.engine().workflow_tasks(workflow.workflow_id).await.unwrap();

    for task in &tasks {
        system.engine().start_task(task.task_id, None).await.unwrap();
        system
            .engine()
            .complete_task(task.task_id, Some("normal".into()), None)
            .await
            .unwrap();
    }

    let status = wait_for_status(&system, workflow.workflow_id, WorkflowState::Completed).await;
    assert_eq!(status, WorkflowState::Completed);

    let snapshot = system.status();
    assert!(snapshot.running);
    assert_eq!(snapshot.bus_partitions, 2);
    assert!(snapshot.events_published >= 7);
    assert_eq!(snapshot.handler_errors, 0);

    system.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_task_is_retried_by_dispatcher() {
    let dir = TempDir::new().unwrap();
    let (system, _) = start(&dir).await;

    let (template, _) = PathwayBuilder::new("Transfusion", t0())
        .task("Crossmatch", "LAB", 45)
        .build(t0());
    let template = system.engine().save_template(template).await.unwrap();
    let workflow = system
        .engine()
        .create_workflow("MRN-7002", template.template_id)
        .await
        .unwrap();
    let task_id = system.engine().workflow_tasks(workflow.workflow_id).await.unwrap()[0].task_id;

    system.engine().start_task(task_id, None).await.unwrap();
    system.engine().fail_task(task_id, "Sample clotted").await.unwrap();

    assert_eq!(wait_for_task(&system, task_id, TaskState::Pending).await, TaskState::Pending);
    let task = system.engine().get_task(task_id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(
        system.engine().get_workflow(workflow.workflow_id).await.unwrap().status,
        WorkflowState::Active
    );

    system.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_on_one_small_partition_drains() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("test.toml"),
        "[dispatcher]\nworker_count = 1\nchannel_capacity = 4\n\n[sla]\ncheck_interval_seconds = 3600\n",
    )
    .unwrap();
    let (system, _) = start(&dir).await;
    assert_eq!(system.bus().partition_count(), 1);

    let (template, _) = PathwayBuilder::new("Discharge", t0())
        .task("Discharge letter", "DOCTOR", 30)
        .build(t0());
    let template = system.engine().save_template(template).await.unwrap();

    let mut workflows = Vec::new();
    let mut task_ids = Vec::new();
    for i in 0..40 {
        let workflow = system
            .engine()
            .create_workflow(format!("MRN-B{i}"), template.template_id)
            .await
            .unwrap();
        task_ids.push(system.engine().workflow_tasks(workflow.workflow_id).await.unwrap()[0].task_id);
        workflows.push(workflow.workflow_id);
    }

    let handles: Vec<_> = task_ids
        .into_iter()
        .map(|task_id| {
            let engine = Arc::clone(system.engine());
            tokio::spawn(async move {
                engine.start_task(task_id, None).await.unwrap();
                engine.complete_task(task_id, None, None).await.unwrap();
            })
        })
        .collect();
    let results = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(handles))
        .await
        .expect("commands stalled on a full partition");
    for result in results {
        result.unwrap();
    }

    for workflow_id in workflows {
        assert_eq!(
            wait_for_status(&system, workflow_id, WorkflowState::Completed).await,
            WorkflowState::Completed
        );
    }

    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_configuration_fails_bootstrap() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("test.toml"),
        "[sla]\ndefault_escalation_target = \"\"\n",
    )
    .unwrap();

    let result = EngineBootstrap::bootstrap_with(
        BootstrapConfig {
            config_directory: Some(dir.path().to_path_buf()),
            environment_override: Some("test".to_string()),
        },
        Arc::new(InMemoryRepository::new()),
        Arc::new(RecordingProvider::default()),
        Arc::new(ManualClock::new(t0())),
    )
    .await;

    let error = result.err().expect("bootstrap should fail");
    assert!(format!("{error:#}").contains("default_escalation_target"));
}
