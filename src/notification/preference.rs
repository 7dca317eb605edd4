use super::{NotificationChannel, NotificationType};
use crate::error::{CarePathwayError, Result};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Daily window in which a user is not disturbed; may cross midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    /// Parse `HH:MM` bounds, e.g. `("22:00", "07:00")`
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
        })
    }

    /// Start is inclusive, end exclusive
    pub fn contains(&self, at: NaiveTime) -> bool {
        let minute_of_day = |t: NaiveTime| t.hour() * 60 + t.minute();
        let (now, start, end) = (minute_of_day(at), minute_of_day(self.start), minute_of_day(self.end));

        if start <= end {
            now >= start && now < end
        } else {
            now >= start || now < end
        }
    }
}

fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| CarePathwayError::validation(format!("Invalid time '{value}', expected HH:MM: {e}")))
}

/// How and when a user wants to be notified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: String,
    pub email_address: Option<String>,
    pub phone_number: Option<String>,
    pub whatsapp_number: Option<String>,
    pub push_token: Option<String>,
    pub preferred_channels: Vec<NotificationChannel>,
    /// Explicit per-type choices; unlisted types use their default
    pub opt_ins: HashMap<NotificationType, bool>,
    pub quiet_hours: Option<QuietHours>,
    pub active: bool,
}

impl NotificationPreference {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email_address: None,
            phone_number: None,
            whatsapp_number: None,
            push_token: None,
            preferred_channels: Vec::new(),
            opt_ins: HashMap::new(),
            quiet_hours: None,
            active: true,
        }
    }

    pub fn with_email(mut self, address: impl Into<String>) -> Self {
        self.email_address = Some(address.into());
        self.add_channel(NotificationChannel::Email);
        self
    }

    pub fn with_sms(mut self, number: impl Into<String>) -> Self {
        self.phone_number = Some(number.into());
        self.add_channel(NotificationChannel::Sms);
        self
    }

    pub fn with_whatsapp(mut self, number: impl Into<String>) -> Self {
        self.whatsapp_number = Some(number.into());
        self.add_channel(NotificationChannel::WhatsApp);
        self
    }

    pub fn with_push(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self.add_channel(NotificationChannel::Push);
        self
    }

    pub fn with_quiet_hours(mut self, quiet_hours: QuietHours) -> Self {
        self.quiet_hours = Some(quiet_hours);
        self
    }

    pub fn opt(mut self, notification_type: NotificationType, enabled: bool) -> Self {
        self.opt_ins.insert(notification_type, enabled);
        self
    }

    fn add_channel(&mut self, channel: NotificationChannel) {
        if !self.preferred_channels.contains(&channel) {
            self.preferred_channels.push(channel);
        }
    }

    pub fn should_notify(&self, notification_type: NotificationType) -> bool {
        self.active
            && self
                .opt_ins
                .get(&notification_type)
                .copied()
                .unwrap_or_else(|| notification_type.default_opt_in())
    }

    pub fn is_within_quiet_hours(&self, now: DateTime<Utc>) -> bool {
        self.quiet_hours
            .is_some_and(|window| window.contains(now.time()))
    }

    pub fn address_for(&self, channel: NotificationChannel) -> Option<&str> {
        match channel {
            NotificationChannel::Email => self.email_address.as_deref(),
            NotificationChannel::Sms => self.phone_number.as_deref(),
            NotificationChannel::WhatsApp => self.whatsapp_number.as_deref(),
            NotificationChannel::Push => self.push_token.as_deref(),
        }
    }
}
