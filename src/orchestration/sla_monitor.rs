//! # SLA Monitor
//!
//! Periodically flags open tasks that are past their due time. A breached
//! task is marked once; if nobody has escalated it yet it is escalated to
//! the manager role matching its assignee.

use super::engine::CarePathwayEngine;
use crate::config::SlaConfig;
use crate::error::Result;
use crate::events::EventContext;
use crate::logging::log_error;
use crate::notification::{NotificationRequest, NotificationType};
use crate::state_machine::{TaskEvent, TaskStateMachine};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of one monitoring pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaReport {
    pub checked: usize,
    pub breached: usize,
    pub escalated: usize,
    pub errors: usize,
}

/// A task flagged during a pass
#[derive(Debug, Clone, PartialEq)]
pub struct SlaBreach {
    pub task_id: Uuid,
    pub workflow_id: Uuid,
    pub task_name: String,
    pub due_at: DateTime<Utc>,
    /// Set when this pass escalated the task
    pub escalated_to: Option<String>,
    pub recipient: Option<String>,
}

pub fn breach_reason(due_at: DateTime<Utc>, detected_at: DateTime<Utc>) -> String {
    let hours_overdue = (detected_at - due_at).num_minutes() as f64 / 60.0;
    format!(
        "SLA Breach - Task due at {}, escalated at {} ({hours_overdue:.1} hours overdue)",
        due_at.to_rfc3339(),
        detected_at.to_rfc3339()
    )
}

#[derive(Debug, Clone)]
pub struct SlaMonitor {
    engine: Arc<CarePathwayEngine>,
    config: SlaConfig,
}

impl SlaMonitor {
    pub fn new(engine: Arc<CarePathwayEngine>) -> Self {
        let config = engine.config().sla.clone();
        Self { engine, config }
    }

    pub async fn run_cycle(&self) -> Result<SlaReport> {
        let now = self.engine.clock().now();
        let candidates = self
            .engine
            .repository()
            .find_overdue_tasks(now, self.config.batch_size)
            .await?;

        let mut report = SlaReport {
            checked: candidates.len(),
            ..SlaReport::default()
        };

        let mut breaches = Vec::new();
        for candidate in candidates {
            match self.flag_breach(candidate.task_id, now).await {
                Ok(Some(breach)) => {
                    report.breached += 1;
                    if breach.escalated_to.is_some() {
                        report.escalated += 1;
                    }
                    breaches.push(breach);
                }
                Ok(None) => {}
                Err(error) => {
                    report.errors += 1;
                    log_error(
                        "sla_monitor",
                        "flag_breach",
                        &error.to_string(),
                        Some(&candidate.task_id.to_string()),
                    );
                }
            }
        }

        join_all(breaches.iter().map(|breach| self.notify(breach))).await;

        if report.breached > 0 {
            info!(
                checked = report.checked,
                breached = report.breached,
                escalated = report.escalated,
                errors = report.errors,
                "SLA cycle finished"
            );
        }
        Ok(report)
    }

    /// Re-check the task under its lock and record the breach
    async fn flag_breach(&self, task_id: Uuid, now: DateTime<Utc>) -> Result<Option<SlaBreach>> {
        let repository = self.engine.repository();

        let (breach, events) = {
            let _guard = self.engine.lock(task_id).await;
            let mut task = repository.get_task(task_id).await?;
            let Some(due_at) = task.due_at else {
                return Ok(None);
            };
            if !task.is_sla_candidate(now) {
                debug!(task_id = %task_id, "Task no longer breaching");
                return Ok(None);
            }

            task.sla_breached = true;
            task.updated_at = now;

            let mut events = Vec::new();
            let mut escalated_to = None;
            if !task.is_escalated {
                let assignee = task.assigned_to.as_deref().or(task.required_role.as_deref());
                let target = self.config.escalation_target_for(assignee).to_string();
                let outcome = TaskStateMachine::new(&mut task, now, EventContext::root()).transition(
                    TaskEvent::Escalate {
                        target: target.clone(),
                        reason: breach_reason(due_at, now),
                    },
                )?;
                events = outcome.events;
                escalated_to = Some(target);
            }

            let task = repository.save_task(task).await?;
            let breach = SlaBreach {
                task_id,
                workflow_id: task.workflow_id,
                task_name: task.name.clone(),
                due_at,
                recipient: task.escalated_to_user.clone(),
                escalated_to,
            };
            (breach, events)
        };

        warn!(
            task_id = %breach.task_id,
            workflow_id = %breach.workflow_id,
            due_at = %breach.due_at,
            escalated_to = ?breach.escalated_to,
            "SLA breached"
        );
        self.engine.publish(events).await;
        Ok(Some(breach))
    }

    async fn notify(&self, breach: &SlaBreach) {
        let Some(recipient) = breach.recipient.as_deref() else {
            return;
        };
        let request = NotificationRequest::new(
            recipient,
            NotificationType::SlaBreach,
            format!("SLA breach: {}", breach.task_name),
            format!(
                "Task {} was due at {} and is still open",
                breach.task_name,
                breach.due_at.to_rfc3339()
            ),
        )
        .for_workflow(breach.workflow_id)
        .for_task(breach.task_id);
        self.engine.notifications().notify(request).await;
    }

    /// Run a pass every check interval until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.check_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_seconds = interval.as_secs(), "SLA monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.run_cycle().await {
                        warn!(error = %error, "SLA cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("SLA monitor shutting down");
                        break;
                    }
                }
            }
        }
    }
}
