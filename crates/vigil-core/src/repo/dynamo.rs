use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};

use crate::alert::{
    Alert, AlertEvent, NotificationEntry, NotificationStatus, RecoveryAttempt, RecoveryStatus,
};
use crate::error::CoreError;
use crate::model::{Channel, Monitor};
use crate::repo::{AlertFilter, Repository, MAX_ALERT_ROWS};
use crate::sample::Sample;
use crate::state::MonitorState;

/// DynamoDB-backed store.
///
/// Table layout:
/// - `monitors`: pk `id`
/// - `monitor_states`: pk `monitor_id`, optimistic lock on `updated_at`
/// - `metrics`: pk `monitor_id`, sk `ts` (epoch milliseconds)
/// - `alerts`: pk `id`, GSI `monitor_id-index` on `monitor_id`
///
/// Alert sub-list mutations use `size(...)` condition expressions so that
/// concurrent writers cannot double-append.
pub struct DynamoRepository {
    client: Client,
    monitors_table: String,
    states_table: String,
    metrics_table: String,
    alerts_table: String,
}

/// GSI over `alerts.monitor_id`.
const MONITOR_INDEX: &str = "monitor_id-index";

impl DynamoRepository {
    /// Create a repository by loading AWS configuration from the
    /// environment. Table names share a common prefix, e.g. `vigil`
    /// yields `vigil-monitors`, `vigil-monitor-states`, `vigil-metrics`
    /// and `vigil-alerts`.
    pub async fn new(table_prefix: impl AsRef<str>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let client = Client::new(&config);
        let prefix = table_prefix.as_ref();
        Self {
            client,
            monitors_table: format!("{prefix}-monitors"),
            states_table: format!("{prefix}-monitor-states"),
            metrics_table: format!("{prefix}-metrics"),
            alerts_table: format!("{prefix}-alerts"),
        }
    }

    async fn load_alert(&self, alert_id: &str) -> Result<Alert, CoreError> {
        self.get_alert(alert_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("alert {alert_id}")))
    }

    /// Write an alert row guarded by the current length of one of its
    /// embedded lists.
    async fn put_alert_guarded(
        &self,
        alert: &Alert,
        guard_attr: &str,
        prev_len: usize,
        conflict_msg: &str,
    ) -> Result<(), CoreError> {
        let item = serde_dynamo::aws_sdk_dynamodb_1::to_item(alert)?;
        self.client
            .put_item()
            .table_name(&self.alerts_table)
            .set_item(Some(item))
            .condition_expression("size(#guard) = :n")
            .expression_attribute_names("#guard", guard_attr)
            .expression_attribute_values(":n", AttributeValue::N(prev_len.to_string()))
            .send()
            .await
            .map_err(|e| map_conditional(e, conflict_msg))?;
        Ok(())
    }
}

fn sdk_err<E, R>(err: SdkError<E, R>) -> CoreError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    CoreError::DynamoSdk(Box::new(err))
}

fn map_conditional<E, R>(err: SdkError<E, R>, conflict_msg: &str) -> CoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let conditional = err
        .as_service_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "ConditionalCheckFailedException");
    if conditional {
        CoreError::Conflict(conflict_msg.to_string())
    } else {
        sdk_err(err)
    }
}

#[async_trait]
impl Repository for DynamoRepository {
    async fn list_monitors(&self) -> Result<Vec<Monitor>, CoreError> {
        let mut monitors = Vec::new();
        let mut stream = self
            .client
            .scan()
            .table_name(&self.monitors_table)
            .into_paginator()
            .items()
            .send();
        while let Some(item) = stream.next().await {
            let item = item.map_err(sdk_err)?;
            monitors.push(serde_dynamo::aws_sdk_dynamodb_1::from_item(item)?);
        }
        Ok(monitors)
    }

    async fn get_monitor(&self, id: &str) -> Result<Option<Monitor>, CoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.monitors_table)
            .key("id", AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(sdk_err)?;
        out.item.map(serde_dynamo::aws_sdk_dynamodb_1::from_item).transpose().map_err(Into::into)
    }

    async fn upsert_monitor(&self, monitor: &Monitor) -> Result<(), CoreError> {
        let item = serde_dynamo::aws_sdk_dynamodb_1::to_item(monitor)?;
        self.client
            .put_item()
            .table_name(&self.monitors_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn get_state(&self, monitor_id: &str) -> Result<Option<MonitorState>, CoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.states_table)
            .key("monitor_id", AttributeValue::S(monitor_id.to_string()))
            .send()
            .await
            .map_err(sdk_err)?;
        out.item.map(serde_dynamo::aws_sdk_dynamodb_1::from_item).transpose().map_err(Into::into)
    }

    async fn put_state(
        &self,
        state: &MonitorState,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let item = serde_dynamo::aws_sdk_dynamodb_1::to_item(state)?;
        let mut put = self
            .client
            .put_item()
            .table_name(&self.states_table)
            .set_item(Some(item));

        match expected_updated_at {
            None => {
                put = put.condition_expression("attribute_not_exists(monitor_id)");
            }
            Some(expected) => {
                // Serialize the token the same way the stored attribute was
                let expected_av: AttributeValue = serde_dynamo::aws_sdk_dynamodb_1::to_attribute_value(expected)?;
                put = put
                    .condition_expression("updated_at = :expected")
                    .expression_attribute_values(":expected", expected_av);
            }
        }

        put.send()
            .await
            .map_err(|e| map_conditional(e, "monitor state modified concurrently"))?;
        Ok(())
    }

    async fn append_sample(&self, sample: &Sample) -> Result<(), CoreError> {
        let mut item = serde_dynamo::aws_sdk_dynamodb_1::to_item(sample)?;
        // Numeric sort key; the RFC3339 timestamp attribute stays for readers
        item.insert(
            "ts".to_string(),
            AttributeValue::N(sample.timestamp.timestamp_millis().to_string()),
        );
        self.client
            .put_item()
            .table_name(&self.metrics_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(sdk_err)?;
        Ok(())
    }

    async fn latest_sample(&self, monitor_id: &str) -> Result<Option<Sample>, CoreError> {
        Ok(self.recent_samples(monitor_id, 1).await?.into_iter().next())
    }

    async fn recent_samples(
        &self,
        monitor_id: &str,
        limit: usize,
    ) -> Result<Vec<Sample>, CoreError> {
        let out = self
            .client
            .query()
            .table_name(&self.metrics_table)
            .key_condition_expression("monitor_id = :m")
            .expression_attribute_values(":m", AttributeValue::S(monitor_id.to_string()))
            .scan_index_forward(false)
            .limit(limit.min(i32::MAX as usize) as i32)
            .send()
            .await
            .map_err(sdk_err)?;
        let items = out.items.unwrap_or_default();
        Ok(serde_dynamo::aws_sdk_dynamodb_1::from_items(items)?)
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<(), CoreError> {
        let item = serde_dynamo::aws_sdk_dynamodb_1::to_item(alert)?;
        self.client
            .put_item()
            .table_name(&self.alerts_table)
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(|e| map_conditional(e, "alert id already exists"))?;
        Ok(())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<(), CoreError> {
        let item = serde_dynamo::aws_sdk_dynamodb_1::to_item(alert)?;
        self.client
            .put_item()
            .table_name(&self.alerts_table)
            .set_item(Some(item))
            .condition_expression("attribute_exists(id)")
            .send()
            .await
            .map_err(|e| map_conditional(e, "alert does not exist"))?;
        Ok(())
    }

    async fn get_alert(&self, id: &str) -> Result<Option<Alert>, CoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.alerts_table)
            .key("id", AttributeValue::S(id.to_string()))
            .send()
            .await
            .map_err(sdk_err)?;
        out.item.map(serde_dynamo::aws_sdk_dynamodb_1::from_item).transpose().map_err(Into::into)
    }

    async fn active_alert_for(&self, monitor_id: &str) -> Result<Option<Alert>, CoreError> {
        let out = self
            .client
            .query()
            .table_name(&self.alerts_table)
            .index_name(MONITOR_INDEX)
            .key_condition_expression("monitor_id = :m")
            .expression_attribute_values(":m", AttributeValue::S(monitor_id.to_string()))
            .send()
            .await
            .map_err(sdk_err)?;
        let alerts: Vec<Alert> = serde_dynamo::aws_sdk_dynamodb_1::from_items(out.items.unwrap_or_default())?;
        Ok(alerts.into_iter().find(|a| !a.status.is_terminal()))
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>, CoreError> {
        let mut alerts: Vec<Alert> = if let Some(monitor_id) = &filter.monitor_id {
            let out = self
                .client
                .query()
                .table_name(&self.alerts_table)
                .index_name(MONITOR_INDEX)
                .key_condition_expression("monitor_id = :m")
                .expression_attribute_values(":m", AttributeValue::S(monitor_id.clone()))
                .send()
                .await
                .map_err(sdk_err)?;
            serde_dynamo::aws_sdk_dynamodb_1::from_items(out.items.unwrap_or_default())?
        } else {
            let mut rows = Vec::new();
            let mut stream = self
                .client
                .scan()
                .table_name(&self.alerts_table)
                .into_paginator()
                .items()
                .send();
            while let Some(item) = stream.next().await {
                let item = item.map_err(sdk_err)?;
                rows.push(serde_dynamo::aws_sdk_dynamodb_1::from_item(item)?);
            }
            rows
        };

        if let Some(status) = filter.status {
            alerts.retain(|a| a.status == status);
        }
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts.truncate(filter.limit.unwrap_or(MAX_ALERT_ROWS).min(MAX_ALERT_ROWS));
        Ok(alerts)
    }

    async fn open_recovery_attempt(
        &self,
        alert_id: &str,
        action: &str,
        now: DateTime<Utc>,
    ) -> Result<RecoveryAttempt, CoreError> {
        let mut alert = self.load_alert(alert_id).await?;
        if alert.recovery_running() {
            return Err(CoreError::Conflict(format!(
                "alert {alert_id} already has a running recovery attempt"
            )));
        }
        let prev_len = alert.recovery_attempts.len();
        let attempt = RecoveryAttempt {
            attempt_number: prev_len as u32 + 1,
            action: action.to_string(),
            started_at: now,
            completed_at: None,
            status: RecoveryStatus::Running,
            error_message: None,
            logs: String::new(),
        };
        alert.recovery_attempts.push(attempt.clone());
        self.put_alert_guarded(
            &alert,
            "recovery_attempts",
            prev_len,
            "recovery attempt appended concurrently",
        )
        .await?;
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
        let mut alert = self.load_alert(alert_id).await?;
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
        self.update_alert(&alert).await
    }

    async fn try_append_notification(
        &self,
        alert_id: &str,
        entry: &NotificationEntry,
    ) -> Result<bool, CoreError> {
        let mut alert = self.load_alert(alert_id).await?;
        if alert.delivery_blocked(entry.event, entry.channel, &entry.recipient, entry.sent_at) {
            return Ok(false);
        }
        let prev_len = alert.notifications_sent.len();
        alert.notifications_sent.push(entry.clone());
        match self
            .put_alert_guarded(
                &alert,
                "notifications_sent",
                prev_len,
                "notification appended concurrently",
            )
            .await
        {
            Ok(()) => Ok(true),
            // A concurrent append beat us; the tuple may now exist, so
            // report a duplicate rather than double-sending
            Err(CoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
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
        let mut alert = self.load_alert(alert_id).await?;
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
        self.update_alert(&alert).await
    }
}
