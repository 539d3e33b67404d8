pub mod dynamo;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alert::{
    Alert, AlertEvent, AlertStatus, NotificationEntry, NotificationStatus, RecoveryAttempt,
    RecoveryStatus,
};
use crate::error::CoreError;
use crate::model::{Channel, Monitor};
use crate::sample::Sample;
use crate::state::MonitorState;

pub use dynamo::DynamoRepository;
pub use memory::MemoryRepository;

/// Filter for alert listings.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub monitor_id: Option<String>,
    /// Hard cap on returned rows; listings are sorted by `triggered_at`
    /// descending.
    pub limit: Option<usize>,
}

/// Maximum rows an alert listing may return.
pub const MAX_ALERT_ROWS: usize = 1000;

/// Durable store for monitors, states, samples and alerts.
///
/// Writes are partitioned by monitor id; state writes use an optimistic
/// lock on `updated_at`. Mutations of an alert's embedded lists
/// (`recovery_attempts`, `notifications_sent`) go through the dedicated
/// append/complete operations so their invariants (dense attempt numbers,
/// single running attempt, at-most-once notification tuples) are enforced
/// in one place.
#[async_trait]
pub trait Repository: Send + Sync {
    // -- monitors --

    async fn list_monitors(&self) -> Result<Vec<Monitor>, CoreError>;
    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>, CoreError>;
    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<(), CoreError>;

    // -- monitor states --

    async fn get_state(&self, monitor_id: &str) -> Result<Option<MonitorState>, CoreError>;

    /// Write a state row. `expected_updated_at` is the optimistic-lock
    /// token: `None` asserts the row does not exist yet; a mismatch fails
    /// with [`CoreError::Conflict`].
    async fn put_state(
        &self,
        state: &MonitorState,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    // -- samples (append-only, last-N retained) --

    async fn append_sample(&self, sample: &Sample) -> Result<(), CoreError>;
    async fn latest_sample(&self, monitor_id: &str) -> Result<Option<Sample>, CoreError>;
    async fn recent_samples(
        &self,
        monitor_id: &str,
        limit: usize,
    ) -> Result<Vec<Sample>, CoreError>;

    // -- alerts --

    async fn insert_alert(&self, alert: &Alert) -> Result<(), CoreError>;
    async fn update_alert(&self, alert: &Alert) -> Result<(), CoreError>;
    async fn get_alert(&self, id: &str) -> Result<Option<Alert>, CoreError>;

    /// The non-terminal alert for a monitor, if one exists.
    async fn active_alert_for(&self, monitor_id: &str) -> Result<Option<Alert>, CoreError>;

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, CoreError>;

    // -- recovery attempts --

    /// Atomically append a `running` attempt. Fails with
    /// [`CoreError::Conflict`] if another attempt is already running.
    async fn open_recovery_attempt(
        &self,
        alert_id: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<RecoveryAttempt, CoreError>;

    /// Close the attempt identified by `(alert_id, attempt_number)`.
    async fn close_recovery_attempt(
        &self,
        alert_id: &str,
        attempt_number: u32,
        status: RecoveryStatus,
        error_message: Option<String>,
        logs: String,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    // -- notifications --

    /// Append a delivery record unless its `(event, channel, recipient)`
    /// tuple already exists for the alert. Returns `false` on a duplicate
    /// (the caller must not send).
    async fn try_append_notification(
        &self,
        alert_id: &str,
        entry: &NotificationEntry,
    ) -> Result<bool, CoreError>;

    /// Record the outcome of a previously appended delivery.
    #[allow(clippy::too_many_arguments)]
    async fn complete_notification(
        &self,
        alert_id: &str,
        event: AlertEvent,
        channel: Channel,
        recipient: &str,
        status: NotificationStatus,
        message_id: Option<String>,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;
}
