//! End-to-end engine scenarios: probe → evaluator → state machine →
//! notifier / recovery, all against the in-memory store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use vigil_core::{
    AlertEvent, AlertStatus, Clock, ManualClock, Monitor, MonitorState, NotificationStatus,
    RecoveryStatus, Repository, Sample, SampleMetadata, Status,
};
use vigil_engine::probes::ProbeDispatch;
use vigil_engine::{
    EngineConfig, Evaluator, Notifier, ProbeRegistry, RecoveryExecutor, Scheduler,
};

fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
}

fn monitor_json(extra: serde_json::Value) -> Monitor {
    let mut base = serde_json::json!({
        "id": "m-1",
        "name": "api-prod",
        "monitor_type": "URL",
        "url": "http://example.test/health",
        "severity": "high",
        "expected_status_codes": [200],
    });
    base.as_object_mut()
        .unwrap()
        .extend(extra.as_object().unwrap().clone());
    serde_json::from_value(base).unwrap()
}

/// Scripted probe outcomes, per monitor id. Monitors without a script
/// produce ok samples.
#[derive(Default)]
struct ScriptedProbes {
    scripts: Mutex<HashMap<String, VecDeque<Sample>>>,
}

impl ScriptedProbes {
    fn push(&self, monitor_id: &str, sample: Sample) {
        self.scripts
            .lock()
            .unwrap()
            .entry(monitor_id.to_string())
            .or_default()
            .push_back(sample);
    }

    fn push_status(&self, monitor_id: &str, status: Status) {
        self.push(
            monitor_id,
            Sample {
                monitor_id: monitor_id.to_string(),
                timestamp: t0(),
                value: Some(1.0),
                status,
                response_time_ms: None,
                metadata: SampleMetadata::default(),
                error_message: (status == Status::Error).then(|| "probe failed".to_string()),
            },
        );
    }
}

#[async_trait]
impl ProbeDispatch for ScriptedProbes {
    async fn check(&self, monitor: &Monitor, now: DateTime<Utc>) -> Sample {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&monitor.id).and_then(|q| q.pop_front()) {
            Some(mut sample) => {
                sample.timestamp = now;
                sample
            }
            None => Sample {
                monitor_id: monitor.id.clone(),
                timestamp: now,
                value: Some(1.0),
                status: Status::Ok,
                response_time_ms: Some(5),
                metadata: SampleMetadata::default(),
                error_message: None,
            },
        }
    }
}

struct Harness {
    repo: Arc<vigil_core::MemoryRepository>,
    clock: Arc<ManualClock>,
    probes: Arc<ScriptedProbes>,
    evaluator: Arc<Evaluator>,
    notifier: Arc<Notifier>,
}

fn harness(monitors: Vec<Monitor>) -> Harness {
    let repo = Arc::new(vigil_core::MemoryRepository::with_monitors(monitors));
    let clock = Arc::new(ManualClock::new(t0()));
    let probes = Arc::new(ScriptedProbes::default());
    let notifier = Arc::new(Notifier::new(
        repo.clone(),
        clock.clone(),
        &EngineConfig::default(),
    ));
    let evaluator = Arc::new(Evaluator::new(
        repo.clone(),
        probes.clone(),
        notifier.clone(),
        clock.clone(),
    ));
    Harness {
        repo,
        clock,
        probes,
        evaluator,
        notifier,
    }
}

async fn run_sequence(h: &Harness, monitor: &Monitor, statuses: &[Status]) {
    for status in statuses {
        h.probes.push_status(&monitor.id, *status);
        h.evaluator.evaluate(monitor).await.unwrap();
        h.clock.advance(ChronoDuration::seconds(60));
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: trigger then recover over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn http_trigger_then_recover() {
    let mut server = mockito::Server::new_async().await;

    let monitor = monitor_json(serde_json::json!({
        "url": format!("{}/health", server.url()),
        "consecutive_alarm": 3,
        "reset_after_m_ok": 2,
    }));

    let repo = Arc::new(vigil_core::MemoryRepository::with_monitors(vec![
        monitor.clone(),
    ]));
    let clock = Arc::new(ManualClock::new(t0()));
    let notifier = Arc::new(Notifier::new(
        repo.clone(),
        clock.clone(),
        &EngineConfig::default(),
    ));
    let evaluator = Arc::new(Evaluator::new(
        repo.clone(),
        Arc::new(ProbeRegistry::new()),
        notifier,
        clock.clone(),
    ));

    let failing = server
        .mock("GET", "/health")
        .with_status(500)
        .expect(3)
        .create_async()
        .await;
    for _ in 0..3 {
        evaluator.evaluate(&monitor).await.unwrap();
        clock.advance(ChronoDuration::seconds(60));
    }
    failing.assert_async().await;
    server.reset_async().await;

    let _healthy = server
        .mock("GET", "/health")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;
    for _ in 0..2 {
        evaluator.evaluate(&monitor).await.unwrap();
        clock.advance(ChronoDuration::seconds(60));
    }

    let alerts = repo
        .list_alerts(&vigil_core::AlertFilter::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.status, AlertStatus::Recovered);
    assert_eq!(alert.consecutive_failures, 3);
    // Recovery happened at the fifth sample
    assert_eq!(alert.recovered_at, Some(t0() + ChronoDuration::seconds(240)));

    let state = repo.get_state(&monitor.id).await.unwrap().unwrap();
    assert!(state.active_alert_id.is_none());
    assert_eq!(state.current_status, Status::Ok);
}

// ---------------------------------------------------------------------------
// Scenario 2: warning escalates to alarm, two notification rounds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn warning_escalates_with_two_notification_rounds() {
    let monitor = monitor_json(serde_json::json!({
        "consecutive_warning": 2,
        "consecutive_alarm": 4,
        "alarming_candidate": [{
            "email": "oncall@example.test",
            "notification_preferences": {
                "warning": ["email"],
                "alarm": ["email"]
            }
        }],
    }));
    let h = harness(vec![monitor.clone()]);

    run_sequence(
        &h,
        &monitor,
        &[
            Status::Warning,
            Status::Warning,
            Status::Warning,
            Status::Alarm,
            Status::Alarm,
        ],
    )
    .await;

    let alerts = h
        .repo
        .list_alerts(&vigil_core::AlertFilter::default())
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.severity, vigil_core::AlertSeverity::Alarm);
    assert_eq!(alert.status, AlertStatus::Active);

    // One round for the trigger, one for the escalation. SMTP is not
    // configured in tests, so both deliveries are recorded as failed;
    // the tuples still count as attempted.
    let events: Vec<AlertEvent> = alert.notifications_sent.iter().map(|n| n.event).collect();
    assert_eq!(events, vec![AlertEvent::Triggered, AlertEvent::Escalated]);
    assert!(alert
        .notifications_sent
        .iter()
        .all(|n| n.status == NotificationStatus::Failed));
}

// ---------------------------------------------------------------------------
// Scenario 3: certificate close to expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn certificate_five_days_to_expiry() {
    let monitor = monitor_json(serde_json::json!({
        "monitor_type": "CERTIFICATE",
        "hostname": "example.test",
        "warning_threshold_days": 30,
        "alarm_threshold_days": 7,
        "consecutive_alarm": 1,
    }));
    let h = harness(vec![monitor.clone()]);

    h.probes.push(
        &monitor.id,
        Sample {
            monitor_id: monitor.id.clone(),
            timestamp: t0(),
            value: Some(5.0),
            status: Status::Alarm,
            response_time_ms: None,
            metadata: SampleMetadata {
                certificate: Some(vigil_core::CertificateInfo {
                    common_name: Some("example.test".into()),
                    issuer: "CN=Test CA".into(),
                    serial: "0a:1b".into(),
                    sans: vec!["example.test".into()],
                    not_after: t0() + ChronoDuration::days(5),
                    days_remaining: 5,
                }),
                ..SampleMetadata::default()
            },
            error_message: Some("certificate expires in 5 days".into()),
        },
    );
    h.evaluator.evaluate(&monitor).await.unwrap();

    let sample = h.repo.latest_sample(&monitor.id).await.unwrap().unwrap();
    assert_eq!(sample.status, Status::Alarm);
    assert_eq!(
        sample.metadata.certificate.as_ref().unwrap().days_remaining,
        5
    );

    let alert = h.repo.active_alert_for(&monitor.id).await.unwrap().unwrap();
    assert!(alert.message.contains("5 day"), "message: {}", alert.message);
}

// ---------------------------------------------------------------------------
// Scenario 4: recovery command lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recovery_command_success() {
    let monitor = monitor_json(serde_json::json!({
        "consecutive_alarm": 1,
        "reset_after_m_ok": 2,
        "recovery_action": "exit 0",
    }));
    let h = harness(vec![monitor.clone()]);

    // Raise an alert
    run_sequence(&h, &monitor, &[Status::Alarm]).await;
    let alert = h.repo.active_alert_for(&monitor.id).await.unwrap().unwrap();

    let executor = RecoveryExecutor::new(h.repo.clone(), h.clock.clone(), &EngineConfig::default());
    let attempt = executor.trigger_and_wait(&alert.id).await.unwrap();

    assert_eq!(attempt.attempt_number, 1);
    assert_eq!(attempt.status, RecoveryStatus::Success);
    assert_eq!(attempt.logs, "");
    assert!(attempt.completed_at.is_some());

    let state = h.repo.get_state(&monitor.id).await.unwrap().unwrap();
    assert!(!state.recovery_in_progress);
    assert_eq!(state.recovery_attempt_count, 1);

    // Recovery does not flip the alert; the hysteresis does
    let alert = h.repo.get_alert(&alert.id).await.unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::InRecovery);

    run_sequence(&h, &monitor, &[Status::Ok, Status::Ok]).await;
    let alert = h.repo.get_alert(&alert.id).await.unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Recovered);
}

#[tokio::test]
async fn recovery_concurrent_triggers_conflict() {
    let monitor = monitor_json(serde_json::json!({
        "consecutive_alarm": 1,
        "recovery_action": "sleep 2",
    }));
    let h = harness(vec![monitor.clone()]);
    run_sequence(&h, &monitor, &[Status::Alarm]).await;
    let alert = h.repo.active_alert_for(&monitor.id).await.unwrap().unwrap();

    let executor = Arc::new(RecoveryExecutor::new(
        h.repo.clone(),
        h.clock.clone(),
        &EngineConfig::default(),
    ));

    let first = executor.trigger(&alert.id).await.unwrap();
    assert_eq!(first, 1);

    // A second trigger while the attempt runs conflicts
    let err = executor.trigger(&alert.id).await.unwrap_err();
    assert!(matches!(err, vigil_engine::EngineError::RecoveryConflict(_)));
}

#[tokio::test]
async fn recovery_cap_exhausts() {
    let monitor = monitor_json(serde_json::json!({
        "consecutive_alarm": 1,
        "recovery_action": "exit 1",
    }));
    let h = harness(vec![monitor.clone()]);
    run_sequence(&h, &monitor, &[Status::Alarm]).await;
    let alert = h.repo.active_alert_for(&monitor.id).await.unwrap().unwrap();

    let executor = RecoveryExecutor::new(h.repo.clone(), h.clock.clone(), &EngineConfig::default());
    for n in 1..=3 {
        let attempt = executor.trigger_and_wait(&alert.id).await.unwrap();
        assert_eq!(attempt.attempt_number, n);
        assert_eq!(attempt.status, RecoveryStatus::Failed);
    }

    let err = executor.trigger_and_wait(&alert.id).await.unwrap_err();
    assert!(matches!(
        err,
        vigil_engine::EngineError::RecoveryExhausted(_)
    ));
}

// ---------------------------------------------------------------------------
// Scenario 5: maintenance window
// ---------------------------------------------------------------------------

#[tokio::test]
async fn maintenance_window_skips_without_advancing() {
    let monitor = monitor_json(serde_json::json!({
        "maintenance_windows": [{ "start": "09:00", "end": "10:00" }],
    }));
    let h = harness(vec![monitor.clone()]);

    // 09:30 UTC on an arbitrary day
    let inside = chrono::NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
        .and_utc();
    h.clock.set(inside);

    let scheduler = Scheduler::new(
        h.repo.clone(),
        h.evaluator.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        EngineConfig::default(),
    );

    let summary = scheduler.execute_due().await.unwrap();
    assert_eq!(summary.total, 1);
    assert_eq!(summary.executed, 0);
    assert_eq!(summary.skipped, 1);

    // No sample row, no state advance
    assert!(h.repo.latest_sample(&monitor.id).await.unwrap().is_none());
    assert!(h.repo.get_state(&monitor.id).await.unwrap().is_none());

    // After the window the monitor is due immediately
    h.clock.set(inside + ChronoDuration::hours(1));
    let summary = scheduler.execute_due().await.unwrap();
    assert_eq!(summary.executed, 1);
    assert!(h.repo.latest_sample(&monitor.id).await.unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Scenario 6: notification dedup across ticks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notification_dedup_across_ticks() {
    let monitor = monitor_json(serde_json::json!({
        "consecutive_alarm": 1,
        "alarming_candidate": [{
            "email": "oncall@example.test",
            "notification_preferences": { "alarm": ["email"] }
        }],
    }));
    let h = harness(vec![monitor.clone()]);

    // Two consecutive failing evaluations observe the same active alert
    run_sequence(&h, &monitor, &[Status::Alarm, Status::Alarm]).await;

    let alert = h.repo.active_alert_for(&monitor.id).await.unwrap().unwrap();
    assert_eq!(alert.notifications_sent.len(), 1);
    assert_eq!(alert.notifications_sent[0].event, AlertEvent::Triggered);

    // Even an explicit re-dispatch of the same event adds nothing
    h.notifier
        .dispatch(&monitor, &alert, AlertEvent::Triggered)
        .await;
    let alert = h.repo.get_alert(&alert.id).await.unwrap().unwrap();
    assert_eq!(alert.notifications_sent.len(), 1);
}

// ---------------------------------------------------------------------------
// Scheduler lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduler_start_stop_round_trip() {
    let h = harness(vec![]);
    let scheduler = Scheduler::new(
        h.repo.clone(),
        h.evaluator.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        EngineConfig::default(),
    );

    assert!(!scheduler.is_running());
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());

    // Double start is rejected
    assert!(matches!(
        scheduler.start().await.unwrap_err(),
        vigil_engine::EngineError::AlreadyRunning
    ));

    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running());
    assert!(matches!(
        scheduler.stop().await.unwrap_err(),
        vigil_engine::EngineError::NotRunning
    ));

    // Stop then start yields the same observable running state
    scheduler.start().await.unwrap();
    assert!(scheduler.is_running());
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn execute_now_rejected_while_stopped() {
    let monitor = monitor_json(serde_json::json!({}));
    let h = harness(vec![monitor.clone()]);
    let scheduler = Scheduler::new(
        h.repo.clone(),
        h.evaluator.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        EngineConfig::default(),
    );

    let err = scheduler.execute_now(&monitor.id).await.unwrap_err();
    assert!(matches!(err, vigil_engine::EngineError::NotRunning));

    scheduler.start().await.unwrap();
    let outcome = scheduler.execute_now(&monitor.id).await.unwrap();
    assert_eq!(outcome.status, Status::Ok);
    assert!(outcome.success);

    let err = scheduler.execute_now("no-such-monitor").await.unwrap_err();
    assert!(matches!(err, vigil_engine::EngineError::MonitorNotFound(_)));

    scheduler.stop().await.unwrap();
}

// ---------------------------------------------------------------------------
// Dueness ordering and per-monitor exclusivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_due_monitors_execute() {
    let due = monitor_json(serde_json::json!({ "id": "m-due", "name": "due" }));
    let fresh = monitor_json(serde_json::json!({ "id": "m-fresh", "name": "fresh" }));
    let h = harness(vec![due.clone(), fresh.clone()]);

    // `fresh` was checked moments ago; `due` never
    let state = MonitorState {
        last_check_time: Some(h.clock.now()),
        ..MonitorState::new(&fresh.id, h.clock.now())
    };
    h.repo.put_state(&state, None).await.unwrap();

    let scheduler = Scheduler::new(
        h.repo.clone(),
        h.evaluator.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        EngineConfig::default(),
    );

    let summary = scheduler.execute_due().await.unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.executed, 1);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].monitor_id, "m-due");

    // Both due once the period elapses
    h.clock.advance(ChronoDuration::minutes(6));
    let summary = scheduler.execute_due().await.unwrap();
    assert_eq!(summary.executed, 2);
}

#[tokio::test]
async fn inactive_monitors_are_ignored() {
    let mut paused = monitor_json(serde_json::json!({ "id": "m-paused", "name": "paused" }));
    paused.running = false;
    let h = harness(vec![paused]);

    let scheduler = Scheduler::new(
        h.repo.clone(),
        h.evaluator.clone(),
        h.notifier.clone(),
        h.clock.clone(),
        EngineConfig::default(),
    );

    let summary = scheduler.execute_due().await.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.executed, 0);
}
