use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AlertSeverity, Channel};
use crate::sample::SampleMetadata;

/// Alert lifecycle status.
///
/// At most one alert per monitor is non-terminal (not `Recovered`) at any
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    InRecovery,
    Acknowledged,
    Recovered,
}

impl AlertStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Recovered)
    }
}

/// Alert lifecycle events dispatched to notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEvent {
    Triggered,
    Escalated,
    Acknowledged,
    Recovered,
    Reminder,
}

impl std::fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertEvent::Triggered => f.write_str("alert_triggered"),
            AlertEvent::Escalated => f.write_str("alert_escalated"),
            AlertEvent::Acknowledged => f.write_str("alert_acknowledged"),
            AlertEvent::Recovered => f.write_str("alert_recovered"),
            AlertEvent::Reminder => f.write_str("reminder"),
        }
    }
}

/// One remediation attempt, appended to the owning alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// 1-based, dense: equals the attempt list length at append time.
    pub attempt_number: u32,
    /// Command string as configured at the time of the attempt.
    pub action: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RecoveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Captured stdout+stderr, truncated at the executor's byte cap.
    #[serde(default)]
    pub logs: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    Running,
    Success,
    Failed,
}

/// One notification delivery record. Written before the send is attempted;
/// the `(event, channel, recipient)` tuple is attempted at most once per
/// alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub event: AlertEvent,
    pub channel: Channel,
    pub recipient: String,
    pub sent_at: DateTime<Utc>,
    pub status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

/// A durable record of one abnormal-condition episode for a monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub monitor_id: String,
    pub monitor_name: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub triggered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_value: Option<f64>,
    /// Failure streak length at trigger time.
    pub consecutive_failures: u32,
    pub message: String,
    #[serde(default)]
    pub metadata: SampleMetadata,
    #[serde(default)]
    pub recovery_attempts: Vec<RecoveryAttempt>,
    #[serde(default)]
    pub notifications_sent: Vec<NotificationEntry>,
}

impl Alert {
    /// Whether a recovery attempt is currently running.
    pub fn recovery_running(&self) -> bool {
        self.recovery_attempts
            .iter()
            .any(|a| a.status == RecoveryStatus::Running)
    }

    /// The most recent notification entry matching `event`, if any.
    pub fn last_notification(&self, event: AlertEvent) -> Option<&NotificationEntry> {
        self.notifications_sent
            .iter()
            .rev()
            .find(|n| n.event == event)
    }

    /// Whether a delivery for the dedup tuple has already been attempted.
    pub fn notified(&self, event: AlertEvent, channel: Channel, recipient: &str) -> bool {
        self.notifications_sent
            .iter()
            .any(|n| n.event == event && n.channel == channel && n.recipient == recipient)
    }

    /// Whether appending a delivery for the tuple is blocked.
    ///
    /// Most tuples are attempted at most once per alert. Reminder tuples
    /// repeat, but no more often than [`REMINDER_MIN_GAP_SECS`]: each new
    /// 24h round counts as a separate tuple.
    pub fn delivery_blocked(
        &self,
        event: AlertEvent,
        channel: Channel,
        recipient: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let latest = self
            .notifications_sent
            .iter()
            .rev()
            .find(|n| n.event == event && n.channel == channel && n.recipient == recipient);
        match (event, latest) {
            (_, None) => false,
            (AlertEvent::Reminder, Some(n)) => {
                (now - n.sent_at).num_seconds() < REMINDER_MIN_GAP_SECS
            }
            (_, Some(_)) => true,
        }
    }
}

/// Minimum spacing between reminder deliveries for the same tuple.
pub const REMINDER_MIN_GAP_SECS: i64 = 24 * 3600;
