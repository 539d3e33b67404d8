pub mod email;
pub mod sms;
pub mod template;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use vigil_core::{
    Alert, AlertEvent, AlertSeverity, Channel, ChannelPrefs, Clock, Contact, Monitor,
    NotificationEntry, NotificationStatus, Repository,
};

use crate::config::EngineConfig;
pub use email::EmailSender;
pub use sms::SmsSender;
pub use template::Rendered;
pub use webhook::WebhookSender;

/// Channel delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("email build error: {0}")]
    Email(#[from] lettre::error::Error),

    #[error("bad recipient: {0}")]
    BadRecipient(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Gateway(String),

    #[error("channel not configured: {0}")]
    NotConfigured(&'static str),
}

impl NotifyError {
    /// Transport-level failures are worth retrying; configuration and
    /// addressing problems are not.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            NotifyError::Smtp(_) | NotifyError::Http(_) | NotifyError::Gateway(_)
        )
    }
}

/// Fan-out dispatcher for alert lifecycle events.
///
/// Delivery guarantee is at-most-once per `(alert, event, channel,
/// recipient)` tuple: the log entry is persisted before the send, and a
/// failed send is recorded but never re-attempted for the same tuple.
pub struct Notifier {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    email: Option<EmailSender>,
    sms: Option<SmsSender>,
    webhook: WebhookSender,
}

impl Notifier {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        let email = match &config.smtp {
            Some(smtp) => match EmailSender::new(smtp) {
                Ok(sender) => Some(sender),
                Err(e) => {
                    warn!(error = %e, "SMTP config rejected, email channel disabled");
                    None
                }
            },
            None => None,
        };
        let sms = config.sms_gateway_url.clone().map(SmsSender::new);

        Self {
            repo,
            clock,
            email,
            sms,
            webhook: WebhookSender::new(),
        }
    }

    /// Dispatch one event to every resolved `(channel, recipient)` pair.
    /// Returns the number of successful deliveries. Failures are recorded
    /// on the alert and logged; they never propagate.
    pub async fn dispatch(&self, monitor: &Monitor, alert: &Alert, event: AlertEvent) -> usize {
        let deliveries = resolve_channels(monitor, alert.severity, event);
        if deliveries.is_empty() {
            return 0;
        }

        let rendered = template::render(monitor, alert, event);
        let mut sent = 0;

        for (channel, recipient) in deliveries {
            let now = self.clock.now();
            let entry = NotificationEntry {
                event,
                channel,
                recipient: recipient.clone(),
                sent_at: now,
                status: NotificationStatus::Pending,
                message_id: None,
                error_message: None,
            };

            // Persist before sending; a duplicate tuple means this
            // delivery already happened (or permanently failed)
            match self.repo.try_append_notification(&alert.id, &entry).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(alert = %alert.id, error = %e, "cannot record notification, skipping send");
                    continue;
                }
            }

            let result = self
                .send_with_retry(channel, &recipient, &rendered, monitor, alert, event)
                .await;

            let (status, message_id, error_message) = match result {
                Ok(message_id) => {
                    sent += 1;
                    info!(alert = %alert.id, %channel, recipient = %recipient, %event, "notification sent");
                    (NotificationStatus::Sent, message_id, None)
                }
                Err(e) => {
                    warn!(alert = %alert.id, %channel, recipient = %recipient, error = %e, "notification failed");
                    (NotificationStatus::Failed, None, Some(e.to_string()))
                }
            };

            if let Err(e) = self
                .repo
                .complete_notification(
                    &alert.id,
                    event,
                    channel,
                    &recipient,
                    status,
                    message_id,
                    error_message,
                    self.clock.now(),
                )
                .await
            {
                warn!(alert = %alert.id, error = %e, "cannot record notification outcome");
            }
        }

        sent
    }

    /// Send with retry on transient transport errors: 3 extra attempts
    /// with backoff of 1s, 4s and 15s.
    async fn send_with_retry(
        &self,
        channel: Channel,
        recipient: &str,
        rendered: &Rendered,
        monitor: &Monitor,
        alert: &Alert,
        event: AlertEvent,
    ) -> Result<Option<String>, NotifyError> {
        let delays = [
            Duration::from_secs(1),
            Duration::from_secs(4),
            Duration::from_secs(15),
        ];

        let mut last_err = None;

        for (attempt, delay) in std::iter::once(&Duration::ZERO)
            .chain(delays.iter())
            .enumerate()
        {
            if attempt > 0 {
                warn!(%channel, attempt, "send failed, retrying after {delay:?}");
                tokio::time::sleep(*delay).await;
            }

            match self
                .send_once(channel, recipient, rendered, monitor, alert, event)
                .await
            {
                Ok(message_id) => {
                    if attempt > 0 {
                        info!(%channel, attempt, "send succeeded after retry");
                    }
                    return Ok(message_id);
                }
                Err(e) if e.is_transient() => {
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.expect("at least one attempt was made"))
    }

    async fn send_once(
        &self,
        channel: Channel,
        recipient: &str,
        rendered: &Rendered,
        monitor: &Monitor,
        alert: &Alert,
        event: AlertEvent,
    ) -> Result<Option<String>, NotifyError> {
        match channel {
            Channel::Email => {
                let email = self
                    .email
                    .as_ref()
                    .ok_or(NotifyError::NotConfigured("email"))?;
                email.send(recipient, rendered).await
            }
            Channel::Sms | Channel::Call => {
                let sms = self.sms.as_ref().ok_or(NotifyError::NotConfigured("sms"))?;
                sms.send(recipient, &rendered.text, channel == Channel::Call)
                    .await
            }
            Channel::Slack => {
                let payload = serde_json::json!({
                    "text": format!("{}\n{}", rendered.subject, rendered.text),
                });
                self.webhook.send(recipient, &payload).await
            }
            Channel::Webhook => {
                let payload = serde_json::json!({
                    "event": event.to_string(),
                    "monitor_id": monitor.id,
                    "monitor": monitor.name,
                    "alert_id": alert.id,
                    "severity": alert.severity,
                    "status": alert.status,
                    "message": alert.message,
                    "value": alert.current_value,
                    "threshold": alert.threshold_value,
                    "triggered_at": alert.triggered_at,
                });
                self.webhook.send(recipient, &payload).await
            }
        }
    }
}

fn prefs_channels(prefs: &ChannelPrefs, severity: AlertSeverity) -> &[Channel] {
    match severity {
        AlertSeverity::Warning => &prefs.warning,
        AlertSeverity::Alarm => &prefs.alarm,
    }
}

fn settings_channels(monitor: &Monitor, severity: AlertSeverity) -> &[Channel] {
    match severity {
        AlertSeverity::Warning => &monitor.notification_settings.warning_channels,
        AlertSeverity::Alarm => &monitor.notification_settings.alarm_channels,
    }
}

fn contact_channels(
    contact: &Contact,
    monitor: &Monitor,
    severity: AlertSeverity,
) -> Vec<Channel> {
    let from_prefs = contact
        .notification_preferences
        .as_ref()
        .map(|p| prefs_channels(p, severity))
        .filter(|c| !c.is_empty());
    match from_prefs {
        Some(channels) => channels.to_vec(),
        None => settings_channels(monitor, severity).to_vec(),
    }
}

/// Resolve the `(channel, recipient)` pairs for an event.
///
/// Escalation notifications go to the union of the warning and alarm
/// channel sets; everything else follows the alert's severity. Monitor-wide
/// webhook/slack URLs are added independently of contacts.
pub fn resolve_channels(
    monitor: &Monitor,
    severity: AlertSeverity,
    event: AlertEvent,
) -> Vec<(Channel, String)> {
    let severities: &[AlertSeverity] = match event {
        AlertEvent::Escalated => &[AlertSeverity::Warning, AlertSeverity::Alarm],
        _ => match severity {
            AlertSeverity::Warning => &[AlertSeverity::Warning],
            AlertSeverity::Alarm => &[AlertSeverity::Alarm],
        },
    };

    let mut out: Vec<(Channel, String)> = Vec::new();
    let mut push = |pair: (Channel, String)| {
        if !out.contains(&pair) {
            out.push(pair);
        }
    };

    for sev in severities {
        for contact in &monitor.alarming_candidate {
            for channel in contact_channels(contact, monitor, *sev) {
                let recipient = match channel {
                    Channel::Email => contact.email.clone(),
                    Channel::Sms | Channel::Call => contact.mobile.clone(),
                    Channel::Webhook => monitor.notification_settings.webhook_url.clone(),
                    Channel::Slack => monitor.notification_settings.slack_webhook_url.clone(),
                };
                if let Some(recipient) = recipient {
                    push((channel, recipient));
                }
            }
        }

        // Monitor-wide webhook channels apply even without contacts
        for channel in settings_channels(monitor, *sev) {
            let recipient = match channel {
                Channel::Webhook => monitor.notification_settings.webhook_url.clone(),
                Channel::Slack => monitor.notification_settings.slack_webhook_url.clone(),
                _ => None,
            };
            if let Some(recipient) = recipient {
                push((*channel, recipient));
            }
        }
    }

    out
}
