//! # Engine Configuration
//!
//! Tunables for the care pathway engine: retry budgets, sweep cadences,
//! dispatcher sizing, escalation roles and notification channels.
//!
//! Values are layered by [`ConfigManager`]: built-in defaults, then
//! `base.toml`, then `{environment}.toml`, then `CARE_PATHWAY__*`
//! environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use care_pathway::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let interval = manager.config().sla.check_interval();
//! let workers = manager.config().dispatcher.worker_count;
//! # Ok(())
//! # }
//! ```

pub mod loader;

pub use loader::ConfigManager;

use crate::constants::{escalation, system};
use crate::error::{CarePathwayError, Result};
use crate::notification::NotificationChannel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tasks: TaskConfig,
    pub sla: SlaConfig,
    pub compensation: CompensationConfig,
    pub dispatcher: DispatcherConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub default_max_retries: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_max_retries: system::DEFAULT_TASK_MAX_RETRIES,
        }
    }
}

/// Maps an assignee role prefix onto the role that receives its escalations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRole {
    pub prefix: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    pub enabled: bool,
    pub check_interval_seconds: u64,
    pub batch_size: usize,
    /// Checked in order; the first matching prefix wins
    pub escalation_roles: Vec<EscalationRole>,
    pub default_escalation_target: String,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: system::DEFAULT_SLA_CHECK_INTERVAL_SECONDS,
            batch_size: system::DEFAULT_SLA_BATCH_SIZE,
            escalation_roles: escalation::DEFAULT_ROLE_PREFIXES
                .iter()
                .map(|(prefix, target)| EscalationRole {
                    prefix: (*prefix).to_string(),
                    target: (*target).to_string(),
                })
                .collect(),
            default_escalation_target: escalation::SUPERVISOR.to_string(),
        }
    }
}

impl SlaConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    /// Escalation target for an assignee, chosen by role prefix
    pub fn escalation_target_for(&self, assignee: Option<&str>) -> &str {
        assignee
            .and_then(|assignee| {
                self.escalation_roles
                    .iter()
                    .find(|role| assignee.starts_with(role.prefix.as_str()))
            })
            .map(|role| role.target.as_str())
            .unwrap_or(self.default_escalation_target.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensationConfig {
    pub default_max_retries: u32,
    pub retry_interval_seconds: u64,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            default_max_retries: system::DEFAULT_COMPENSATION_MAX_RETRIES,
            retry_interval_seconds: system::DEFAULT_COMPENSATION_RETRY_INTERVAL_SECONDS,
        }
    }
}

impl CompensationConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of event-bus partitions, each drained by one consumer
    pub worker_count: usize,
    pub channel_capacity: usize,
    pub max_propagation_depth: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: system::DEFAULT_DISPATCHER_WORKERS,
            channel_capacity: system::DEFAULT_CHANNEL_CAPACITY,
            max_propagation_depth: system::DEFAULT_MAX_PROPAGATION_DEPTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled_channels: Vec<NotificationChannel>,
    pub max_retries: u32,
    pub retry_interval_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled_channels: NotificationChannel::ALL.to_vec(),
            max_retries: system::DEFAULT_NOTIFICATION_MAX_RETRIES,
            retry_interval_seconds: system::DEFAULT_NOTIFICATION_RETRY_INTERVAL_SECONDS,
        }
    }
}

impl NotificationConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }

    pub fn is_enabled(&self, channel: NotificationChannel) -> bool {
        self.enabled_channels.contains(&channel)
    }
}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sla.check_interval_seconds == 0 {
            return Err(invalid_value(
                "sla.check_interval_seconds",
                "0",
                "interval must be greater than 0",
            ));
        }

        if self.sla.batch_size == 0 {
            return Err(invalid_value("sla.batch_size", "0", "batch size must be greater than 0"));
        }

        if self.sla.default_escalation_target.trim().is_empty() {
            return Err(CarePathwayError::Configuration(
                "Missing required field 'sla.default_escalation_target'".to_string(),
            ));
        }

        if let Some(role) = self
            .sla
            .escalation_roles
            .iter()
            .find(|role| role.prefix.is_empty() || role.target.is_empty())
        {
            return Err(invalid_value(
                "sla.escalation_roles",
                &format!("{}={}", role.prefix, role.target),
                "prefix and target must both be set",
            ));
        }

        if self.compensation.retry_interval_seconds == 0 {
            return Err(invalid_value(
                "compensation.retry_interval_seconds",
                "0",
                "interval must be greater than 0",
            ));
        }

        if self.dispatcher.worker_count == 0 {
            return Err(invalid_value(
                "dispatcher.worker_count",
                "0",
                "at least one worker is required",
            ));
        }

        if self.dispatcher.channel_capacity == 0 {
            return Err(invalid_value(
                "dispatcher.channel_capacity",
                "0",
                "capacity must be greater than 0",
            ));
        }

        if self.dispatcher.max_propagation_depth == 0 {
            return Err(invalid_value(
                "dispatcher.max_propagation_depth",
                "0",
                "depth must be greater than 0",
            ));
        }

        if self.notifications.retry_interval_seconds == 0 {
            return Err(invalid_value(
                "notifications.retry_interval_seconds",
                "0",
                "interval must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid_value(field: &str, value: &str, reason: &str) -> CarePathwayError {
    CarePathwayError::Configuration(format!("Invalid value '{value}' for '{field}': {reason}"))
}
