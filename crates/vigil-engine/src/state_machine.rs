use chrono::{DateTime, Utc};
use vigil_core::{
    Alert, AlertEvent, AlertSeverity, AlertStatus, Monitor, MonitorKind, MonitorState, Sample,
    Status,
};

use crate::classify::crossed_threshold;

/// Input to one state-machine step.
pub struct TransitionCtx<'a> {
    pub monitor: &'a Monitor,
    pub state: &'a MonitorState,
    pub active_alert: Option<&'a Alert>,
    pub sample: &'a Sample,
    pub now: DateTime<Utc>,
}

/// Alert mutation produced by a step.
#[derive(Debug, Clone)]
pub enum AlertChange {
    Created(Alert),
    Updated(Alert),
}

impl AlertChange {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertChange::Created(a) | AlertChange::Updated(a) => a,
        }
    }
}

/// Result of one state-machine step: the replacement state row, the alert
/// mutation (if any) and the lifecycle events to dispatch.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: MonitorState,
    pub alert_change: Option<AlertChange>,
    pub events: Vec<AlertEvent>,
}

/// Advance the per-monitor state machine by one sample.
///
/// Pure with respect to its inputs (alert ids aside): replaying the same
/// sample stream against the same starting state yields the same final
/// state regardless of timing.
///
/// `current_status` only enters warning/alarm when hysteresis confirms the
/// condition and an alert exists; a sub-threshold abnormal observation
/// leaves it unchanged at ok. This keeps the invariant that
/// `active_alert_id` is present exactly when the status is warning or
/// alarm.
pub fn advance(ctx: TransitionCtx<'_>) -> Transition {
    let TransitionCtx {
        monitor,
        state,
        active_alert,
        sample,
        now,
    } = ctx;

    let mut next = state.clone();
    next.last_check_time = Some(sample.timestamp);
    next.last_value = sample.value;
    next.last_error = sample.error_message.clone();
    next.updated_at = now;

    // Counter update: success and failure streaks are mutually exclusive
    if sample.status.is_failure() {
        next.consecutive_failures += 1;
        next.consecutive_successes = 0;
    } else {
        next.consecutive_successes += 1;
        next.consecutive_failures = 0;
    }

    let mut events = Vec::new();
    let mut alert_change = None;

    match active_alert {
        None => {
            // Rule 1: trigger warning
            if sample.status == Status::Warning
                && next.consecutive_failures >= monitor.consecutive_warning
            {
                let alert = new_alert(monitor, sample, AlertSeverity::Warning, &next, now);
                next.active_alert_id = Some(alert.id.clone());
                next.current_status = Status::Warning;
                events.push(AlertEvent::Triggered);
                alert_change = Some(AlertChange::Created(alert));
            }
            // Rule 3: trigger alarm directly (error counts)
            else if matches!(sample.status, Status::Alarm | Status::Error)
                && next.consecutive_failures >= monitor.consecutive_alarm
            {
                let alert = new_alert(monitor, sample, AlertSeverity::Alarm, &next, now);
                next.active_alert_id = Some(alert.id.clone());
                next.current_status = Status::Alarm;
                events.push(AlertEvent::Triggered);
                alert_change = Some(AlertChange::Created(alert));
            } else {
                // No alert: status stays out of {warning, alarm}
                next.current_status = match sample.status {
                    Status::Error => Status::Error,
                    _ => Status::Ok,
                };
            }
        }
        Some(alert) => {
            // Rule 4: recover
            if next.consecutive_successes >= monitor.reset_after_m_ok {
                let mut recovered = alert.clone();
                recovered.status = AlertStatus::Recovered;
                recovered.recovered_at = Some(now);
                next.active_alert_id = None;
                next.current_status = Status::Ok;
                next.recovery_in_progress = false;
                next.recovery_attempt_count = 0;
                events.push(AlertEvent::Recovered);
                alert_change = Some(AlertChange::Updated(recovered));
            }
            // Rule 2: escalate warning to alarm
            else if alert.severity == AlertSeverity::Warning
                && matches!(sample.status, Status::Alarm | Status::Error)
                && next.consecutive_failures >= monitor.consecutive_alarm
            {
                let mut escalated = alert.clone();
                escalated.severity = AlertSeverity::Alarm;
                escalated.current_value = sample.value;
                escalated.threshold_value = sample
                    .value
                    .and_then(|v| crossed_threshold(v, &monitor.thresholds));
                escalated.message = render_message(
                    monitor,
                    sample,
                    AlertSeverity::Alarm,
                    next.consecutive_failures,
                );
                next.current_status = Status::Alarm;
                events.push(AlertEvent::Escalated);
                alert_change = Some(AlertChange::Updated(escalated));
            } else {
                // Alert continues: keep the severity-mapped status
                next.current_status = match alert.severity {
                    AlertSeverity::Warning => Status::Warning,
                    AlertSeverity::Alarm => Status::Alarm,
                };
            }
        }
    }

    Transition {
        state: next,
        alert_change,
        events,
    }
}

fn new_alert(
    monitor: &Monitor,
    sample: &Sample,
    severity: AlertSeverity,
    state: &MonitorState,
    now: DateTime<Utc>,
) -> Alert {
    Alert {
        id: uuid::Uuid::new_v4().to_string(),
        monitor_id: monitor.id.clone(),
        monitor_name: monitor.name.clone(),
        severity,
        status: AlertStatus::Active,
        triggered_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
        acknowledged_note: None,
        recovered_at: None,
        current_value: sample.value,
        threshold_value: sample
            .value
            .and_then(|v| crossed_threshold(v, &monitor.thresholds)),
        consecutive_failures: state.consecutive_failures,
        message: render_message(monitor, sample, severity, state.consecutive_failures),
        metadata: sample.metadata.clone(),
        recovery_attempts: Vec::new(),
        notifications_sent: Vec::new(),
    }
}

/// Deterministic alert message. Certificate and log samples carry their own
/// renderings; everything else uses the standard value/threshold form.
pub fn render_message(
    monitor: &Monitor,
    sample: &Sample,
    severity: AlertSeverity,
    failures: u32,
) -> String {
    if let Some(cert) = &sample.metadata.certificate {
        return format!(
            "{} {severity}: certificate expires in {} days (not after {})",
            monitor.name,
            cert.days_remaining,
            cert.not_after.format("%Y-%m-%d"),
        );
    }

    if matches!(monitor.kind, MonitorKind::Log { .. }) {
        let count = sample.value.unwrap_or_default() as i64;
        return format!(
            "{} {severity}: {count} matching log lines after {failures} failures",
            monitor.name,
        );
    }

    format!(
        "{} {severity}: value={} threshold={} after {failures} failures",
        monitor.name,
        fmt_opt(sample.value),
        fmt_opt(
            sample
                .value
                .and_then(|v| crossed_threshold(v, &monitor.thresholds))
        ),
    )
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{v}"),
        None => "n/a".to_string(),
    }
}
