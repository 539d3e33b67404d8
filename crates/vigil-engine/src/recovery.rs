use std::sync::Arc;

use tracing::{info, warn};
use vigil_core::{
    AlertStatus, Clock, CoreError, RecoveryAttempt, RecoveryStatus, Repository,
};

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::probes::command::{run_local, CommandError};

/// Captured recovery output is truncated at this many bytes.
const LOG_CAP: usize = 64 * 1024;

/// Runs the admin-configured recovery command for an alert.
///
/// One attempt per alert may run at a time; concurrent triggers conflict.
/// Running the command never flips the alert to recovered — only the
/// evaluator's consecutive-success hysteresis does that.
pub struct RecoveryExecutor {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    timeout: std::time::Duration,
    max_attempts: u32,
}

impl RecoveryExecutor {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            repo,
            clock,
            timeout: config.recovery_timeout,
            max_attempts: config.max_recovery_attempts,
        }
    }

    /// Open an attempt and run the command in the background. Returns the
    /// attempt number as soon as the attempt is durably open.
    pub async fn trigger(self: &Arc<Self>, alert_id: &str) -> Result<u32, EngineError> {
        let (attempt, monitor_id, action) = self.open_attempt(alert_id).await?;
        let number = attempt.attempt_number;

        let this = Arc::clone(self);
        let alert_id = alert_id.to_string();
        tokio::spawn(async move {
            this.run_attempt(&alert_id, &monitor_id, &action, number).await;
        });

        Ok(number)
    }

    /// Open an attempt and run it to completion. Returns the closed
    /// attempt.
    pub async fn trigger_and_wait(&self, alert_id: &str) -> Result<RecoveryAttempt, EngineError> {
        let (attempt, monitor_id, action) = self.open_attempt(alert_id).await?;
        self.run_attempt(alert_id, &monitor_id, &action, attempt.attempt_number)
            .await;
        let alert = self
            .repo
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| EngineError::AlertNotFound(alert_id.to_string()))?;
        alert
            .recovery_attempts
            .into_iter()
            .find(|a| a.attempt_number == attempt.attempt_number)
            .ok_or_else(|| EngineError::AlertNotFound(alert_id.to_string()))
    }

    async fn open_attempt(
        &self,
        alert_id: &str,
    ) -> Result<(RecoveryAttempt, String, String), EngineError> {
        let alert = self
            .repo
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| EngineError::AlertNotFound(alert_id.to_string()))?;

        if alert.status.is_terminal() {
            return Err(EngineError::RecoveryConflict(format!(
                "{alert_id} (already recovered)"
            )));
        }

        let monitor = self
            .repo
            .get_monitor(&alert.monitor_id)
            .await?
            .ok_or_else(|| EngineError::MonitorNotFound(alert.monitor_id.clone()))?;
        let action = monitor
            .recovery_action
            .clone()
            .ok_or_else(|| EngineError::NoRecoveryAction(monitor.id.clone()))?;

        if alert.recovery_attempts.len() as u32 >= self.max_attempts {
            return Err(EngineError::RecoveryExhausted(alert_id.to_string()));
        }

        let now = self.clock.now();
        let attempt = self
            .repo
            .open_recovery_attempt(alert_id, &action, now)
            .await
            .map_err(|e| match e {
                CoreError::Conflict(_) => EngineError::RecoveryConflict(alert_id.to_string()),
                other => EngineError::Repo(other),
            })?;

        // Attempt is open: flag the alert and the monitor state
        let mut alert = self
            .repo
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| EngineError::AlertNotFound(alert_id.to_string()))?;
        alert.status = AlertStatus::InRecovery;
        self.repo.update_alert(&alert).await?;
        self.mark_state(&alert.monitor_id, true, Some(now)).await;

        info!(
            alert = %alert_id,
            attempt = attempt.attempt_number,
            action = %attempt.action,
            "recovery attempt started"
        );

        Ok((attempt, alert.monitor_id, action))
    }

    async fn run_attempt(&self, alert_id: &str, monitor_id: &str, action: &str, number: u32) {
        let result = run_local(action, self.timeout, LOG_CAP).await;

        let (status, error_message, logs) = match result {
            Ok(out) if out.exit_code == 0 => (RecoveryStatus::Success, None, out.combined()),
            Ok(out) => (
                RecoveryStatus::Failed,
                Some(format!("command exited with {}", out.exit_code)),
                out.combined(),
            ),
            Err(CommandError::TimedOut(d)) => (
                RecoveryStatus::Failed,
                Some(format!("recovery command timed out after {d:?}")),
                String::new(),
            ),
            Err(e) => (RecoveryStatus::Failed, Some(e.to_string()), String::new()),
        };

        let now = self.clock.now();
        if let Err(e) = self
            .repo
            .close_recovery_attempt(
                alert_id,
                number,
                status,
                error_message.clone(),
                logs,
                now,
            )
            .await
        {
            warn!(alert = %alert_id, attempt = number, error = %e, "cannot close recovery attempt");
        }
        self.mark_state(monitor_id, false, None).await;

        match status {
            RecoveryStatus::Success => {
                info!(alert = %alert_id, attempt = number, "recovery attempt succeeded");
            }
            _ => {
                warn!(
                    alert = %alert_id,
                    attempt = number,
                    error = ?error_message,
                    "recovery attempt failed"
                );
            }
        }
    }

    /// Update the monitor state's recovery flags, retrying once on an
    /// optimistic-lock conflict with the evaluator.
    async fn mark_state(
        &self,
        monitor_id: &str,
        in_progress: bool,
        started_at: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        for _ in 0..2 {
            let Ok(Some(mut state)) = self.repo.get_state(monitor_id).await else {
                return;
            };
            let token = state.updated_at;
            state.recovery_in_progress = in_progress;
            if let Some(at) = started_at {
                state.recovery_attempt_count += 1;
                state.last_recovery_attempt = Some(at);
            }
            state.updated_at = self.clock.now();
            match self.repo.put_state(&state, Some(token)).await {
                Ok(()) => return,
                Err(CoreError::Conflict(_)) => continue,
                Err(e) => {
                    warn!(monitor = %monitor_id, error = %e, "cannot update recovery flags");
                    return;
                }
            }
        }
        warn!(monitor = %monitor_id, "recovery flag update lost to concurrent writers");
    }
}
