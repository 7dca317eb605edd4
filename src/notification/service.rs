use super::{NotificationChannel, NotificationPreference, NotificationProvider, NotificationType};
use crate::clock::Clock;
use crate::config::NotificationConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the engine wants to tell a user
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub recipient_user_id: String,
    pub notification_type: NotificationType,
    pub subject: String,
    pub message: String,
    pub workflow_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

impl NotificationRequest {
    pub fn new(
        recipient_user_id: impl Into<String>,
        notification_type: NotificationType,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient_user_id: recipient_user_id.into(),
            notification_type,
            subject: subject.into(),
            message: message.into(),
            workflow_id: None,
            task_id: None,
            order_id: None,
        }
    }

    pub fn for_workflow(mut self, workflow_id: Uuid) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn for_order(mut self, order_id: Uuid) -> Self {
        self.order_id = Some(order_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// Audit record of one delivery attempt chain on one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: Uuid,
    pub recipient_user_id: String,
    pub channel: NotificationChannel,
    pub recipient_address: String,
    pub notification_type: NotificationType,
    pub subject: String,
    pub message: String,
    pub workflow_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub status: NotificationStatus,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_retryable(&self) -> bool {
        self.retry_count < self.max_retries
            && matches!(self.status, NotificationStatus::Pending | NotificationStatus::Failed)
    }

    fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(now);
        self.failure_reason = None;
    }

    fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = NotificationStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.retry_count += 1;
    }
}

/// Applies preferences and channel policy, then hands messages to the provider
#[derive(Debug)]
pub struct NotificationService {
    provider: Arc<dyn NotificationProvider>,
    clock: Arc<dyn Clock>,
    config: NotificationConfig,
    preferences: DashMap<String, NotificationPreference>,
    notifications: DashMap<Uuid, Notification>,
}

impl NotificationService {
    pub fn new(
        provider: Arc<dyn NotificationProvider>,
        clock: Arc<dyn Clock>,
        config: NotificationConfig,
    ) -> Self {
        Self {
            provider,
            clock,
            config,
            preferences: DashMap::new(),
            notifications: DashMap::new(),
        }
    }

    pub fn set_preference(&self, preference: NotificationPreference) {
        self.preferences.insert(preference.user_id.clone(), preference);
    }

    pub fn preference(&self, user_id: &str) -> Option<NotificationPreference> {
        self.preferences.get(user_id).map(|entry| entry.value().clone())
    }

    /// Deliver a request on every eligible channel.
    ///
    /// Returns the records created; empty when the user has no preference,
    /// opted out, or is inside quiet hours.
    pub async fn notify(&self, request: NotificationRequest) -> Vec<Notification> {
        let Some(preference) = self.preference(&request.recipient_user_id) else {
            debug!(
                recipient = %request.recipient_user_id,
                notification_type = %request.notification_type,
                "No notification preference for recipient"
            );
            return Vec::new();
        };

        if !preference.should_notify(request.notification_type) {
            debug!(
                recipient = %request.recipient_user_id,
                notification_type = %request.notification_type,
                "Recipient opted out"
            );
            return Vec::new();
        }

        let now = self.clock.now();
        if preference.is_within_quiet_hours(now) {
            debug!(
                recipient = %request.recipient_user_id,
                "Recipient in quiet hours, notification suppressed"
            );
            return Vec::new();
        }

        let mut delivered = Vec::new();
        for channel in &preference.preferred_channels {
            if !self.config.is_enabled(*channel) {
                continue;
            }
            let Some(address) = preference.address_for(*channel) else {
                continue;
            };

            let mut notification = Notification {
                notification_id: Uuid::new_v4(),
                recipient_user_id: request.recipient_user_id.clone(),
                channel: *channel,
                recipient_address: address.to_string(),
                notification_type: request.notification_type,
                subject: request.subject.clone(),
                message: request.message.clone(),
                workflow_id: request.workflow_id,
                task_id: request.task_id,
                order_id: request.order_id,
                status: NotificationStatus::Pending,
                failure_reason: None,
                retry_count: 0,
                max_retries: self.config.max_retries,
                created_at: now,
                sent_at: None,
            };

            self.attempt(&mut notification).await;
            self.notifications
                .insert(notification.notification_id, notification.clone());
            delivered.push(notification);
        }
        delivered
    }

    async fn attempt(&self, notification: &mut Notification) {
        let accepted = self
            .provider
            .send(
                notification.channel,
                &notification.recipient_address,
                &notification.subject,
                &notification.message,
            )
            .await;

        if accepted {
            notification.mark_sent(self.clock.now());
            info!(
                notification_id = %notification.notification_id,
                channel = %notification.channel,
                notification_type = %notification.notification_type,
                "Notification sent"
            );
        } else {
            notification.mark_failed(format!("{} provider returned false", notification.channel));
            warn!(
                notification_id = %notification.notification_id,
                channel = %notification.channel,
                retry_count = notification.retry_count,
                max_retries = notification.max_retries,
                "Notification delivery failed"
            );
        }
    }

    /// Re-send failed notifications that still have retries left.
    ///
    /// Returns how many went out on this pass.
    pub async fn retry_failed(&self) -> usize {
        let retryable: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|entry| {
                entry.status == NotificationStatus::Failed && entry.is_retryable()
            })
            .map(|entry| entry.value().clone())
            .collect();

        if retryable.is_empty() {
            debug!("No notifications to retry");
            return 0;
        }

        info!(count = retryable.len(), "Retrying failed notifications");
        let mut sent = 0;
        for mut notification in retryable {
            self.attempt(&mut notification).await;
            if notification.status == NotificationStatus::Sent {
                sent += 1;
            }
            self.notifications
                .insert(notification.notification_id, notification);
        }
        sent
    }

    pub fn history(&self, user_id: &str) -> Vec<Notification> {
        let mut history: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|entry| entry.recipient_user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        history.sort_by_key(|notification| notification.created_at);
        history
    }

    /// Periodic retry of failed deliveries until shutdown is signalled
    pub async fn run_retry_loop(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.retry_failed().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Notification retry loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}
