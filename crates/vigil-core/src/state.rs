use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sample::Status;

/// Mutable per-monitor evaluation state. Owned by the evaluator and only
/// ever mutated under the monitor's lock.
///
/// Invariants:
/// - `consecutive_failures` and `consecutive_successes` are never both > 0.
/// - `active_alert_id` is present iff `current_status` is warning or alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorState {
    pub monitor_id: String,
    pub current_status: Status,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_alert_id: Option<String>,
    #[serde(default)]
    pub recovery_in_progress: bool,
    #[serde(default)]
    pub recovery_attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_recovery_attempt: Option<DateTime<Utc>>,
    /// Optimistic-lock token; bumped on every write.
    pub updated_at: DateTime<Utc>,
}

impl MonitorState {
    /// Fresh state for a monitor that has never been checked.
    pub fn new(monitor_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            current_status: Status::Ok,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_time: None,
            last_value: None,
            last_error: None,
            active_alert_id: None,
            recovery_in_progress: false,
            recovery_attempt_count: 0,
            last_recovery_attempt: None,
            updated_at: now,
        }
    }

    /// Whether the monitor is due for evaluation at `now`.
    pub fn is_due(&self, period_minutes: u32, now: DateTime<Utc>) -> bool {
        match self.last_check_time {
            None => true,
            Some(last) => now - last >= chrono::Duration::minutes(i64::from(period_minutes)),
        }
    }

    /// How far past its period the monitor is, in seconds. Monitors never
    /// checked sort as maximally overdue.
    pub fn overdue_secs(&self, period_minutes: u32, now: DateTime<Utc>) -> i64 {
        match self.last_check_time {
            None => i64::MAX,
            Some(last) => {
                (now - last).num_seconds() - i64::from(period_minutes) * 60
            }
        }
    }
}
