use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::alert::{
    Alert, AlertEvent, NotificationEntry, NotificationStatus, RecoveryAttempt, RecoveryStatus,
};
use crate::error::CoreError;
use crate::model::{Channel, Monitor};
use crate::repo::{AlertFilter, Repository, MAX_ALERT_ROWS};
use crate::sample::Sample;
use crate::state::MonitorState;

/// Samples retained per monitor; older rows are dropped on append.
const SAMPLE_RETENTION: usize = 500;

#[derive(Default)]
struct Inner {
    monitors: HashMap<String, Monitor>,
    states: HashMap<String, MonitorState>,
    samples: HashMap<String, VecDeque<Sample>>,
    alerts: HashMap<String, Alert>,
}

/// In-memory store. The default backing store and the test backbone; all
/// invariant enforcement (optimistic state lock, single running attempt,
/// notification dedup) matches the DynamoDB implementation.
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a monitor definition. Test and bootstrap convenience.
    pub fn with_monitors(monitors: impl IntoIterator<Item = Monitor>) -> Self {
        let repo = Self::new();
        {
            let mut inner = repo.inner.write().unwrap();
            for m in monitors {
                inner.monitors.insert(m.id.clone(), m);
            }
        }
        repo
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_monitors(&self) -> Result<Vec<Monitor>, CoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.monitors.values().cloned().collect())
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>, CoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.monitors.get(id).cloned())
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        inner.monitors.insert(monitor.id.clone(), monitor.clone());
        Ok(())
    }

    async fn get_state(&self, monitor_id: &str) -> Result<Option<MonitorState>, CoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.states.get(monitor_id).cloned())
    }

    async fn put_state(
        &self,
        state: &MonitorState,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let existing = inner.states.get(&state.monitor_id);
        match (existing, expected_updated_at) {
            (None, None) => {}
            (Some(_), None) => {
                return Err(CoreError::Conflict(format!(
                    "state for {} already exists",
                    state.monitor_id
                )));
            }
            (None, Some(_)) => {
                return Err(CoreError::NotFound(format!(
                    "state for {}",
                    state.monitor_id
                )));
            }
            (Some(current), Some(expected)) => {
                if current.updated_at != expected {
                    return Err(CoreError::Conflict(format!(
                        "state for {} modified concurrently",
                        state.monitor_id
                    )));
                }
            }
        }
        inner
            .states
            .insert(state.monitor_id.clone(), state.clone());
        Ok(())
    }

    async fn append_sample(&self, sample: &Sample) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let rows = inner
            .samples
            .entry(sample.monitor_id.clone())
            .or_default();
        rows.push_back(sample.clone());
        while rows.len() > SAMPLE_RETENTION {
            rows.pop_front();
        }
        Ok(())
    }

    async fn latest_sample(&self, monitor_id: &str) -> Result<Option<Sample>, CoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .samples
            .get(monitor_id)
            .and_then(|rows| rows.back().cloned()))
    }

    async fn recent_samples(
        &self,
        monitor_id: &str,
        limit: usize,
    ) -> Result<Vec<Sample>, CoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .samples
            .get(monitor_id)
            .map(|rows| rows.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        if inner.alerts.contains_key(&alert.id) {
            return Err(CoreError::Conflict(format!("alert {} exists", alert.id)));
        }
        if !alert.status.is_terminal() {
            let open = inner
                .alerts
                .values()
                .any(|a| a.monitor_id == alert.monitor_id && !a.status.is_terminal());
            if open {
                return Err(CoreError::Conflict(format!(
                    "monitor {} already has a non-terminal alert",
                    alert.monitor_id
                )));
            }
        }
        inner.alerts.insert(alert.id.clone(), alert.clone());
        Ok(())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        if !inner.alerts.contains_key(&alert.id) {
            return Err(CoreError::NotFound(format!("alert {}", alert.id)));
        }
        inner.alerts.insert(alert.id.clone(), alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: &str) -> Result<Option<Alert>, CoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.alerts.get(id).cloned())
    }

    async fn active_alert_for(&self, monitor_id: &str) -> Result<Option<Alert>, CoreError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .alerts
            .values()
            .find(|a| a.monitor_id == monitor_id && !a.status.is_terminal())
            .cloned())
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, CoreError> {
        let inner = self.inner.read().unwrap();
        let mut rows: Vec<Alert> = inner
            .alerts
            .values()
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| {
                filter
                    .monitor_id
                    .as_ref()
                    .is_none_or(|id| &a.monitor_id == id)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        rows.truncate(filter.limit.unwrap_or(MAX_ALERT_ROWS).min(MAX_ALERT_ROWS));
        Ok(rows)
    }

    async fn open_recovery_attempt(
        &self,
        alert_id: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<RecoveryAttempt, CoreError> {
        let mut inner = self.inner.write().unwrap();
        let alert = inner
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {alert_id}")))?;
        if alert.recovery_running() {
            return Err(CoreError::Conflict(format!(
                "alert {alert_id} already has a running recovery attempt"
            )));
        }
        let attempt = RecoveryAttempt {
            attempt_number: alert.recovery_attempts.len() as u32 + 1,
            action: action.to_string(),
            started_at: now,
            completed_at: None,
            status: RecoveryStatus::Running,
            error_message: None,
            logs: String::new(),
        };
        alert.recovery_attempts.push(attempt.clone());
        Ok(attempt)
    }

    async fn close_recovery_attempt(
        &self,
        alert_id: &str,
        attempt_number: u32,
        status: RecoveryStatus,
        error_message: Option<String>,
        logs: String,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let alert = inner
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {alert_id}")))?;
        let attempt = alert
            .recovery_attempts
            .iter_mut()
            .find(|a| a.attempt_number == attempt_number)
            .ok_or_else(|| {
                CoreError::NotFound(format!("attempt {attempt_number} of alert {alert_id}"))
            })?;
        attempt.status = status;
        attempt.error_message = error_message;
        attempt.logs = logs;
        attempt.completed_at = Some(now);
        Ok(())
    }

    async fn try_append_notification(
        &self,
        alert_id: &str,
        entry: &NotificationEntry,
    ) -> Result<bool, CoreError> {
        let mut inner = self.inner.write().unwrap();
        let alert = inner
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {alert_id}")))?;
        if alert.delivery_blocked(entry.event, entry.channel, &entry.recipient, entry.sent_at) {
            return Ok(false);
        }
        alert.notifications_sent.push(entry.clone());
        Ok(true)
    }

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
    ) -> Result<(), CoreError> {
        let mut inner = self.inner.write().unwrap();
        let alert = inner
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| CoreError::NotFound(format!("alert {alert_id}")))?;
        let entry = alert
            .notifications_sent
            .iter_mut()
            .rev()
            .find(|n| n.event == event && n.channel == channel && n.recipient == recipient)
            .ok_or_else(|| {
                CoreError::NotFound(format!("notification entry for alert {alert_id}"))
            })?;
        entry.status = status;
        entry.message_id = message_id;
        entry.error_message = error_message;
        entry.sent_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertSeverity;
    use crate::sample::{SampleMetadata, Status};

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn alert(id: &str, monitor_id: &str) -> Alert {
        Alert {
            id: id.into(),
            monitor_id: monitor_id.into(),
            monitor_name: "api-prod".into(),
            severity: AlertSeverity::Warning,
            status: crate::alert::AlertStatus::Active,
            triggered_at: now(),
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledged_note: None,
            recovered_at: None,
            current_value: None,
            threshold_value: None,
            consecutive_failures: 1,
            message: "m".into(),
            metadata: SampleMetadata::default(),
            recovery_attempts: vec![],
            notifications_sent: vec![],
        }
    }

    fn sample(monitor_id: &str, offset_secs: i64) -> Sample {
        Sample {
            monitor_id: monitor_id.into(),
            timestamp: now() + chrono::Duration::seconds(offset_secs),
            value: Some(1.0),
            status: Status::Ok,
            response_time_ms: Some(12),
            metadata: SampleMetadata::default(),
            error_message: None,
        }
    }

    #[tokio::test]
    async fn state_cas_rejects_stale_writer() {
        let repo = MemoryRepository::new();
        let mut state = MonitorState::new("m-1", now());
        repo.put_state(&state, None).await.unwrap();

        let stale_token = state.updated_at;
        state.updated_at = now() + chrono::Duration::seconds(1);
        repo.put_state(&state, Some(stale_token)).await.unwrap();

        // A writer still holding the old token must fail
        let mut racer = state.clone();
        racer.updated_at = now() + chrono::Duration::seconds(2);
        let err = repo.put_state(&racer, Some(stale_token)).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn put_state_none_asserts_absence() {
        let repo = MemoryRepository::new();
        let state = MonitorState::new("m-1", now());
        repo.put_state(&state, None).await.unwrap();
        let err = repo.put_state(&state, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn sample_retention_caps_rows() {
        let repo = MemoryRepository::new();
        for i in 0..(SAMPLE_RETENTION as i64 + 50) {
            repo.append_sample(&sample("m-1", i)).await.unwrap();
        }
        let rows = repo.recent_samples("m-1", usize::MAX).await.unwrap();
        assert_eq!(rows.len(), SAMPLE_RETENTION);
        // Latest row survived
        let latest = repo.latest_sample("m-1").await.unwrap().unwrap();
        assert_eq!(
            latest.timestamp,
            now() + chrono::Duration::seconds(SAMPLE_RETENTION as i64 + 49)
        );
    }

    #[tokio::test]
    async fn second_non_terminal_alert_rejected() {
        let repo = MemoryRepository::new();
        repo.insert_alert(&alert("a-1", "m-1")).await.unwrap();
        let err = repo.insert_alert(&alert("a-2", "m-1")).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
        // A different monitor is fine
        repo.insert_alert(&alert("a-3", "m-2")).await.unwrap();
    }

    #[tokio::test]
    async fn recovery_attempt_numbers_are_dense() {
        let repo = MemoryRepository::new();
        repo.insert_alert(&alert("a-1", "m-1")).await.unwrap();

        let first = repo
            .open_recovery_attempt("a-1", "exit 0", now())
            .await
            .unwrap();
        assert_eq!(first.attempt_number, 1);

        // Second open while the first is running conflicts
        let err = repo
            .open_recovery_attempt("a-1", "exit 0", now())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        repo.close_recovery_attempt("a-1", 1, RecoveryStatus::Success, None, String::new(), now())
            .await
            .unwrap();

        let second = repo
            .open_recovery_attempt("a-1", "exit 0", now())
            .await
            .unwrap();
        assert_eq!(second.attempt_number, 2);
    }

    #[tokio::test]
    async fn notification_dedup_by_tuple() {
        let repo = MemoryRepository::new();
        repo.insert_alert(&alert("a-1", "m-1")).await.unwrap();

        let entry = NotificationEntry {
            event: AlertEvent::Triggered,
            channel: Channel::Email,
            recipient: "ops@example.test".into(),
            sent_at: now(),
            status: NotificationStatus::Pending,
            message_id: None,
            error_message: None,
        };
        assert!(repo.try_append_notification("a-1", &entry).await.unwrap());
        assert!(!repo.try_append_notification("a-1", &entry).await.unwrap());

        // A failed send is recorded and still not retried
        repo.complete_notification(
            "a-1",
            AlertEvent::Triggered,
            Channel::Email,
            "ops@example.test",
            NotificationStatus::Failed,
            None,
            Some("smtp 454".into()),
            now(),
        )
        .await
        .unwrap();
        assert!(!repo.try_append_notification("a-1", &entry).await.unwrap());

        let stored = repo.get_alert("a-1").await.unwrap().unwrap();
        assert_eq!(stored.notifications_sent.len(), 1);
        assert_eq!(
            stored.notifications_sent[0].status,
            NotificationStatus::Failed
        );
    }

    #[tokio::test]
    async fn list_alerts_sorted_and_filtered() {
        let repo = MemoryRepository::new();
        let mut a1 = alert("a-1", "m-1");
        a1.status = crate::alert::AlertStatus::Recovered;
        a1.triggered_at = now();
        let mut a2 = alert("a-2", "m-1");
        a2.triggered_at = now() + chrono::Duration::seconds(60);
        repo.insert_alert(&a1).await.unwrap();
        repo.insert_alert(&a2).await.unwrap();

        let all = repo.list_alerts(&AlertFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        // Newest first
        assert_eq!(all[0].id, "a-2");

        let active = repo
            .list_alerts(&AlertFilter {
                status: Some(crate::alert::AlertStatus::Active),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a-2");
    }
}
