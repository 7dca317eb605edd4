//! # Notifications
//!
//! The engine decides *whether* someone should be told about an escalation,
//! an SLA breach or a workflow outcome; delivery itself goes through a
//! [`NotificationProvider`] supplied by the host.
//!
//! Notifications are never sent while an entity lock is held.

pub mod preference;
pub mod service;

pub use preference::{NotificationPreference, QuietHours};
pub use service::{
    Notification, NotificationRequest, NotificationService, NotificationStatus,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationChannel {
    #[serde(rename = "EMAIL")]
    Email,
    #[serde(rename = "SMS")]
    Sms,
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    #[serde(rename = "PUSH")]
    Push,
}

impl NotificationChannel {
    pub const ALL: [NotificationChannel; 4] = [Self::Email, Self::Sms, Self::WhatsApp, Self::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::WhatsApp => "WHATSAPP",
            Self::Push => "PUSH",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    TaskAssignment,
    TaskEscalation,
    SlaBreach,
    OrderCreated,
    OrderCancelled,
    WorkflowCompletion,
    WorkflowFailure,
}

impl NotificationType {
    /// Opt-in applied when a preference does not mention the type
    pub fn default_opt_in(&self) -> bool {
        !matches!(self, Self::OrderCreated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskAssignment => "TASK_ASSIGNMENT",
            Self::TaskEscalation => "TASK_ESCALATION",
            Self::SlaBreach => "SLA_BREACH",
            Self::OrderCreated => "ORDER_CREATED",
            Self::OrderCancelled => "ORDER_CANCELLED",
            Self::WorkflowCompletion => "WORKFLOW_COMPLETION",
            Self::WorkflowFailure => "WORKFLOW_FAILURE",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery capability for one or more channels
#[async_trait]
pub trait NotificationProvider: Send + Sync + fmt::Debug {
    /// Returns `true` when the provider accepted the message
    async fn send(&self, channel: NotificationChannel, recipient: &str, subject: &str, body: &str)
        -> bool;
}

/// Provider that only writes the message to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationProvider;

#[async_trait]
impl NotificationProvider for LoggingNotificationProvider {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> bool {
        info!(
            channel = %channel,
            recipient = recipient,
            subject = subject,
            body_len = body.len(),
            "Notification delivered to log"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_opt_ins() {
        assert!(NotificationType::SlaBreach.default_opt_in());
        assert!(NotificationType::WorkflowFailure.default_opt_in());
        assert!(!NotificationType::OrderCreated.default_opt_in());
    }

    #[test]
    fn test_channel_wire_names() {
        let json = serde_json::to_string(&NotificationChannel::WhatsApp).unwrap();
        assert_eq!(json, "\"WHATSAPP\"");
        let channel: NotificationChannel = serde_json::from_str("\"PUSH\"").unwrap();
        assert_eq!(channel, NotificationChannel::Push);
    }

    #[tokio::test]
    async fn test_logging_provider_accepts() {
        let provider = LoggingNotificationProvider;
        assert!(
            provider
                .send(NotificationChannel::Email, "a@b.org", "subject", "body")
                .await
        );
    }
}
