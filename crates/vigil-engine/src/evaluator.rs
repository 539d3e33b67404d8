use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use vigil_core::{
    Alert, AlertEvent, AlertSeverity, Clock, Monitor, MonitorState, Repository, Sample, Status,
};

use crate::errors::EngineError;
use crate::notify::Notifier;
use crate::probes::ProbeDispatch;
use crate::state_machine::{advance, AlertChange, TransitionCtx};

/// Samples consulted when rebuilding counters after a lost state row.
const REBUILD_WINDOW: usize = 50;

/// Extra headroom on top of the monitor timeout before the evaluator
/// abandons a probe.
const PROBE_GRACE: Duration = Duration::from_secs(5);

/// Result of one evaluation, as reported to the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct EvalOutcome {
    pub monitor_id: String,
    pub monitor_name: String,
    pub status: Status,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<AlertEvent>,
}

/// Runs probes and advances the per-monitor state machine.
///
/// All work for one monitor is serialized behind its lock; different
/// monitors evaluate in parallel. Persistence order is sample, then alert,
/// then state, so a crash between writes loses at most the state row,
/// which is rebuilt on the next evaluation.
pub struct Evaluator {
    repo: Arc<dyn Repository>,
    probes: Arc<dyn ProbeDispatch>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Evaluator {
    pub fn new(
        repo: Arc<dyn Repository>,
        probes: Arc<dyn ProbeDispatch>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            probes,
            notifier,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, monitor_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(monitor_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Evaluate one monitor: probe, record the sample, advance the state
    /// machine, dispatch any lifecycle events.
    pub async fn evaluate(&self, monitor: &Monitor) -> Result<EvalOutcome, EngineError> {
        let lock = self.lock_for(&monitor.id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        if monitor.in_maintenance(now) {
            return Err(EngineError::InMaintenance(monitor.id.clone()));
        }

        let deadline = Duration::from_secs(u64::from(monitor.timeout_secs)) + PROBE_GRACE;
        let sample = match tokio::time::timeout(deadline, self.probes.check(monitor, now)).await {
            Ok(sample) => sample,
            Err(_) => Sample::probe_error(
                &monitor.id,
                now,
                format!("probe deadline exceeded after {}s", deadline.as_secs()),
            ),
        };

        debug!(
            monitor = %monitor.name,
            status = %sample.status,
            value = ?sample.value,
            "probe finished"
        );

        let (state, expected_token) = match self.repo.get_state(&monitor.id).await? {
            Some(state) => {
                let token = state.updated_at;
                (state, Some(token))
            }
            None => (self.rebuild_state(monitor, now).await?, None),
        };

        let active_alert: Option<Alert> = match &state.active_alert_id {
            Some(id) => self
                .repo
                .get_alert(id)
                .await?
                .filter(|a| !a.status.is_terminal()),
            None => None,
        };

        let transition = advance(TransitionCtx {
            monitor,
            state: &state,
            active_alert: active_alert.as_ref(),
            sample: &sample,
            now,
        });

        // Persistence order: sample, alert, state
        self.repo.append_sample(&sample).await?;
        if let Some(change) = &transition.alert_change {
            match change {
                AlertChange::Created(alert) => self.repo.insert_alert(alert).await?,
                AlertChange::Updated(alert) => self.repo.update_alert(alert).await?,
            }
        }
        self.repo.put_state(&transition.state, expected_token).await?;

        if let Some(change) = &transition.alert_change {
            let alert = change.alert();
            for event in &transition.events {
                let sent = self.notifier.dispatch(monitor, alert, *event).await;
                debug!(monitor = %monitor.name, event = %event, sent, "event dispatched");
            }
        }

        let message = sample
            .error_message
            .clone()
            .unwrap_or_else(|| format!("{} is {}", monitor.name, sample.status));

        Ok(EvalOutcome {
            monitor_id: monitor.id.clone(),
            monitor_name: monitor.name.clone(),
            status: sample.status,
            success: sample.status == Status::Ok,
            message,
            events: transition.events,
        })
    }

    /// Rebuild a missing state row from the active alert and recent
    /// samples.
    async fn rebuild_state(
        &self,
        monitor: &Monitor,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<MonitorState, EngineError> {
        warn!(monitor = %monitor.name, "state row missing, rebuilding from history");
        let mut state = MonitorState::new(&monitor.id, now);

        // Newest first
        let samples = self.repo.recent_samples(&monitor.id, REBUILD_WINDOW).await?;
        if let Some(latest) = samples.first() {
            state.last_check_time = Some(latest.timestamp);
            state.last_value = latest.value;
            state.last_error = latest.error_message.clone();

            let failing = latest.status.is_failure();
            let streak = samples
                .iter()
                .take_while(|s| s.status.is_failure() == failing)
                .count() as u32;
            if failing {
                state.consecutive_failures = streak;
            } else {
                state.consecutive_successes = streak;
            }
        }

        if let Some(alert) = self.repo.active_alert_for(&monitor.id).await? {
            state.active_alert_id = Some(alert.id.clone());
            state.current_status = match alert.severity {
                AlertSeverity::Warning => Status::Warning,
                AlertSeverity::Alarm => Status::Alarm,
            };
            state.recovery_in_progress = alert.recovery_running();
            state.recovery_attempt_count = alert.recovery_attempts.len() as u32;
        } else if let Some(latest) = samples.first() {
            state.current_status = match latest.status {
                Status::Error => Status::Error,
                _ => Status::Ok,
            };
        }

        Ok(state)
    }
}
