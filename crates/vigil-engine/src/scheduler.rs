use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{
    AlertEvent, AlertFilter, AlertSeverity, AlertStatus, Clock, Monitor, Repository,
    REMINDER_MIN_GAP_SECS,
};

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::evaluator::{EvalOutcome, Evaluator};
use crate::notify::Notifier;

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Outcome of one `execute_due` pass.
#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    /// Monitors considered (active and running).
    pub total: usize,
    /// Evaluations actually dispatched.
    pub executed: usize,
    /// Monitors skipped: maintenance window, still being evaluated, or
    /// worker queue full.
    pub skipped: usize,
    pub results: Vec<EvalOutcome>,
}

struct Inner {
    repo: Arc<dyn Repository>,
    evaluator: Arc<Evaluator>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    run_state: Mutex<RunState>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    tick_task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: Mutex<CancellationToken>,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
}

impl Inner {
    fn begin(&self, monitor_id: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap()
            .insert(monitor_id.to_string())
    }

    fn end(&self, monitor_id: &str) {
        self.in_flight.lock().unwrap().remove(monitor_id);
    }
}

/// The tick driver: decides which monitors are due and dispatches their
/// evaluations under the global worker bound and the one-evaluation-per-
/// monitor rule.
///
/// One scheduler exists per process; it is constructed once at startup and
/// owned by the control plane. The run-state machine (`stopped → starting
/// → running → stopping → stopped`) is serialized behind a mutex.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        evaluator: Arc<Evaluator>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            inner: Arc::new(Inner {
                repo,
                evaluator,
                notifier,
                clock,
                config,
                run_state: Mutex::new(RunState::Stopped),
                started_at: Mutex::new(None),
                tick_task: tokio::sync::Mutex::new(None),
                cancel: Mutex::new(CancellationToken::new()),
                semaphore,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn run_state(&self) -> RunState {
        *self.inner.run_state.lock().unwrap()
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.inner.started_at.lock().unwrap()
    }

    fn transition(&self, from: &[RunState], to: RunState) -> Result<(), EngineError> {
        let mut state = self.inner.run_state.lock().unwrap();
        if !from.contains(&state) {
            return Err(match to {
                RunState::Starting => EngineError::AlreadyRunning,
                _ => EngineError::NotRunning,
            });
        }
        *state = to;
        Ok(())
    }

    /// Begin issuing ticks. Fails if the scheduler is not stopped.
    pub async fn start(&self) -> Result<DateTime<Utc>, EngineError> {
        self.transition(&[RunState::Stopped], RunState::Starting)?;

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock().unwrap() = cancel.clone();

        let this = self.clone();
        let tick = self.inner.config.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                match this.execute_due().await {
                    Ok(summary) => debug!(
                        total = summary.total,
                        executed = summary.executed,
                        skipped = summary.skipped,
                        "tick complete"
                    ),
                    // The tick is retried on the next firing; back off a
                    // little so an unavailable store is not hammered
                    Err(e) => {
                        warn!(error = %e, "tick failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        }
                    }
                }
            }
        });
        *self.inner.tick_task.lock().await = Some(handle);

        let now = self.inner.clock.now();
        *self.inner.started_at.lock().unwrap() = Some(now);
        self.transition(&[RunState::Starting], RunState::Running)?;
        info!(tick = ?tick, "scheduler started");
        Ok(now)
    }

    /// Stop issuing ticks. In-flight evaluations may finish within the
    /// shutdown grace; whatever is still running after that is cancelled.
    pub async fn stop(&self) -> Result<DateTime<Utc>, EngineError> {
        self.transition(&[RunState::Running], RunState::Stopping)?;

        self.inner.cancel.lock().unwrap().cancel();

        if let Some(mut handle) = self.inner.tick_task.lock().await.take() {
            let grace = self.inner.config.shutdown_grace;
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(grace = ?grace, "in-flight evaluations exceeded shutdown grace, cancelling");
                handle.abort();
            }
        }

        *self.inner.started_at.lock().unwrap() = None;
        self.inner.in_flight.lock().unwrap().clear();
        self.transition(&[RunState::Stopping], RunState::Stopped)?;
        info!("scheduler stopped");
        Ok(self.inner.clock.now())
    }

    /// Out-of-band evaluation of one monitor, regardless of due time.
    /// Subject to the worker bound and the per-monitor in-flight rule;
    /// rejected while the scheduler is stopped or stopping.
    pub async fn execute_now(&self, monitor_id: &str) -> Result<EvalOutcome, EngineError> {
        match self.run_state() {
            RunState::Stopped | RunState::Stopping => return Err(EngineError::NotRunning),
            RunState::Starting | RunState::Running => {}
        }

        let monitor = self
            .inner
            .repo
            .get_monitor(monitor_id)
            .await?
            .ok_or_else(|| EngineError::MonitorNotFound(monitor_id.to_string()))?;

        let _permit = self
            .inner
            .semaphore
            .acquire()
            .await
            .expect("semaphore never closed");

        if !self.inner.begin(&monitor.id) {
            return Err(EngineError::EvaluationInFlight(monitor.id.clone()));
        }
        let result = self.inner.evaluator.evaluate(&monitor).await;
        self.inner.end(&monitor.id);
        result
    }

    /// One scheduling pass: find due monitors, dispatch their evaluations,
    /// wait for the batch, then sweep long-running alerts for reminders
    /// and time-based escalation.
    pub async fn execute_due(&self) -> Result<TickSummary, EngineError> {
        let now = self.inner.clock.now();

        let monitors = self.inner.repo.list_monitors().await?;
        let candidates: Vec<Monitor> = monitors
            .into_iter()
            .filter(|m| m.active && m.running)
            .collect();
        let total = candidates.len();

        let mut skipped = 0;
        let mut due: Vec<(Monitor, i64)> = Vec::new();
        for monitor in candidates {
            // Inside a window: skip without advancing last_check_time, so
            // the monitor is due as soon as the window closes
            if monitor.in_maintenance(now) {
                skipped += 1;
                continue;
            }
            let state = self.inner.repo.get_state(&monitor.id).await?;
            let (is_due, overdue) = match &state {
                None => (true, i64::MAX),
                Some(s) => (
                    s.is_due(monitor.period_minutes, now),
                    s.overdue_secs(monitor.period_minutes, now),
                ),
            };
            if is_due {
                due.push((monitor, overdue));
            }
        }

        // Critical first, then by how overdue
        due.sort_by(|a, b| {
            b.0.severity
                .rank()
                .cmp(&a.0.severity.rank())
                .then(b.1.cmp(&a.1))
        });

        let mut join_set = JoinSet::new();
        let mut executed = 0;
        for (monitor, _) in due {
            if !self.inner.begin(&monitor.id) {
                // Still being evaluated; it re-qualifies next tick
                skipped += 1;
                continue;
            }
            let permit = match self.inner.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // Worker queue full: drop to skip, never block the tick
                    self.inner.end(&monitor.id);
                    skipped += 1;
                    debug!(monitor = %monitor.name, "worker queue full, skipping");
                    continue;
                }
            };

            executed += 1;
            let inner = self.inner.clone();
            join_set.spawn(async move {
                let _permit = permit;
                // Spread dispatch to avoid thundering herds on shared
                // backends
                let jitter = rand::rng().random_range(0..1000u64);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                let result = inner.evaluator.evaluate(&monitor).await;
                inner.end(&monitor.id);
                (monitor, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => results.push(outcome),
                Ok((monitor, Err(EngineError::InMaintenance(_)))) => {
                    executed -= 1;
                    skipped += 1;
                    debug!(monitor = %monitor.name, "entered maintenance window before evaluation");
                }
                Ok((monitor, Err(e))) => {
                    warn!(monitor = %monitor.name, error = %e, "evaluation failed");
                }
                Err(e) => warn!(error = %e, "evaluation task failed"),
            }
        }

        self.sweep_alerts(now).await;

        Ok(TickSummary {
            total,
            executed,
            skipped,
            results,
        })
    }

    /// Reminder and time-based escalation pass over active alerts. The
    /// notification dedup contract bounds both to a single round per
    /// tuple (reminders: per 24h window).
    async fn sweep_alerts(&self, now: DateTime<Utc>) {
        let filter = AlertFilter {
            status: Some(AlertStatus::Active),
            ..AlertFilter::default()
        };
        let alerts = match self.inner.repo.list_alerts(&filter).await {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, "alert sweep skipped");
                return;
            }
        };

        for alert in alerts {
            let monitor = match self.inner.repo.get_monitor(&alert.monitor_id).await {
                Ok(Some(m)) => m,
                Ok(None) => continue,
                Err(e) => {
                    warn!(alert = %alert.id, error = %e, "alert sweep: monitor load failed");
                    continue;
                }
            };

            let age_secs = (now - alert.triggered_at).num_seconds();

            if alert.severity == AlertSeverity::Alarm && age_secs >= REMINDER_MIN_GAP_SECS {
                self.inner
                    .notifier
                    .dispatch(&monitor, &alert, AlertEvent::Reminder)
                    .await;
            }

            let settings = &monitor.notification_settings;
            if settings.enable_escalation
                && age_secs >= i64::from(settings.escalation_delay_minutes) * 60
            {
                self.inner
                    .notifier
                    .dispatch(&monitor, &alert, AlertEvent::Escalated)
                    .await;
            }
        }
    }
}
