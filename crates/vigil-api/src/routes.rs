use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vigil_core::{Alert, AlertEvent, AlertFilter, AlertStatus, MonitorState, Sample};
use vigil_engine::EvalOutcome;

use crate::errors::ApiError;
use crate::state::AppState;

/// Default number of samples returned by the samples endpoint.
const DEFAULT_SAMPLE_LIMIT: usize = 100;

#[derive(Serialize)]
pub struct SchedulerStateResponse {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub checked_at: String,
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub result: EvalOutcome,
}

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub acknowledged_by: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct RecoverResponse {
    pub attempt_number: u32,
}

#[derive(Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub monitor_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SamplesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// POST /scheduler/start
pub async fn start_scheduler(
    State(state): State<AppState>,
) -> Result<Json<SchedulerStateResponse>, ApiError> {
    let started_at = state.scheduler.start().await?;
    Ok(Json(SchedulerStateResponse {
        running: true,
        started_at: Some(started_at.to_rfc3339()),
        stopped_at: None,
    }))
}

/// POST /scheduler/stop
pub async fn stop_scheduler(
    State(state): State<AppState>,
) -> Result<Json<SchedulerStateResponse>, ApiError> {
    let stopped_at = state.scheduler.stop().await?;
    Ok(Json(SchedulerStateResponse {
        running: false,
        started_at: None,
        stopped_at: Some(stopped_at.to_rfc3339()),
    }))
}

/// GET /scheduler/status
pub async fn scheduler_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.scheduler.is_running(),
        checked_at: state.clock.now().to_rfc3339(),
    })
}

/// POST /monitors/{id}/execute
///
/// One-shot evaluation, regardless of due time.
pub async fn execute_monitor(
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let result = state.scheduler.execute_now(&monitor_id).await?;
    Ok(Json(ExecuteResponse { result }))
}

/// GET /monitors/{id}/state
pub async fn monitor_state(
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
) -> Result<Json<MonitorState>, ApiError> {
    state
        .repo
        .get_state(&monitor_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no state for monitor {monitor_id}")))
}

/// GET /monitors/{id}/samples?limit=
pub async fn monitor_samples(
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
    Query(query): Query<SamplesQuery>,
) -> Result<Json<Vec<Sample>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_SAMPLE_LIMIT);
    let samples = state.repo.recent_samples(&monitor_id, limit).await?;
    Ok(Json(samples))
}

/// POST /alerts/{id}/acknowledge
///
/// Idempotent: acknowledging an already-acknowledged alert is a no-op.
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(body): Json<AcknowledgeRequest>,
) -> Result<Json<Alert>, ApiError> {
    let mut alert = state
        .repo
        .get_alert(&alert_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("alert {alert_id}")))?;

    if alert.status == AlertStatus::Acknowledged {
        return Ok(Json(alert));
    }
    if alert.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "alert {alert_id} is already recovered"
        )));
    }

    alert.status = AlertStatus::Acknowledged;
    alert.acknowledged_at = Some(state.clock.now());
    alert.acknowledged_by = Some(body.acknowledged_by);
    alert.acknowledged_note = body.note;
    state.repo.update_alert(&alert).await?;

    if let Some(monitor) = state.repo.get_monitor(&alert.monitor_id).await? {
        state
            .notifier
            .dispatch(&monitor, &alert, AlertEvent::Acknowledged)
            .await;
    }

    Ok(Json(alert))
}

/// POST /alerts/{id}/recover
pub async fn recover_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<RecoverResponse>, ApiError> {
    let attempt_number = state.recovery.trigger(&alert_id).await?;
    Ok(Json(RecoverResponse { attempt_number }))
}

/// GET /alerts?status=&monitor_id=
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let filter = AlertFilter {
        status: query.status,
        monitor_id: query.monitor_id,
        limit: None,
    };
    let alerts = state.repo.list_alerts(&filter).await?;
    Ok(Json(alerts))
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// All control-plane routes.
pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(health))
        .route("/scheduler/start", axum::routing::post(start_scheduler))
        .route("/scheduler/stop", axum::routing::post(stop_scheduler))
        .route("/scheduler/status", axum::routing::get(scheduler_status))
        .route("/monitors/{id}/execute", axum::routing::post(execute_monitor))
        .route("/monitors/{id}/state", axum::routing::get(monitor_state))
        .route("/monitors/{id}/samples", axum::routing::get(monitor_samples))
        .route(
            "/alerts/{id}/acknowledge",
            axum::routing::post(acknowledge_alert),
        )
        .route("/alerts/{id}/recover", axum::routing::post(recover_alert))
        .route("/alerts", axum::routing::get(list_alerts))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;
    use vigil_core::{
        AlertSeverity, MemoryRepository, Monitor, Repository, SampleMetadata, SystemClock,
    };
    use vigil_engine::{
        EngineConfig, Evaluator, Notifier, ProbeRegistry, RecoveryExecutor, Scheduler,
    };

    fn seed_monitor(recovery_action: Option<&str>) -> Monitor {
        serde_json::from_value(serde_json::json!({
            "id": "m-1",
            "name": "api-prod",
            "monitor_type": "URL",
            "url": "http://example.test/health",
            "severity": "high",
            "recovery_action": recovery_action,
        }))
        .unwrap()
    }

    fn seed_alert() -> Alert {
        Alert {
            id: "a-1".into(),
            monitor_id: "m-1".into(),
            monitor_name: "api-prod".into(),
            severity: AlertSeverity::Alarm,
            status: AlertStatus::Active,
            triggered_at: chrono::Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledged_note: None,
            recovered_at: None,
            current_value: None,
            threshold_value: None,
            consecutive_failures: 3,
            message: "api-prod alarm".into(),
            metadata: SampleMetadata::default(),
            recovery_attempts: vec![],
            notifications_sent: vec![],
        }
    }

    fn app(monitors: Vec<Monitor>) -> (axum::Router, Arc<MemoryRepository>) {
        let repo = Arc::new(MemoryRepository::with_monitors(monitors));
        let clock = Arc::new(SystemClock);
        let config = EngineConfig::default();
        let notifier = Arc::new(Notifier::new(repo.clone(), clock.clone(), &config));
        let evaluator = Arc::new(Evaluator::new(
            repo.clone(),
            Arc::new(ProbeRegistry::new()),
            notifier.clone(),
            clock.clone(),
        ));
        let recovery = Arc::new(RecoveryExecutor::new(repo.clone(), clock.clone(), &config));
        let scheduler = Scheduler::new(
            repo.clone(),
            evaluator,
            notifier.clone(),
            clock.clone(),
            config,
        );
        let state = AppState {
            scheduler,
            repo: repo.clone(),
            recovery,
            notifier,
            clock,
        };
        (router(state), repo)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _) = app(vec![]);
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn scheduler_lifecycle_endpoints() {
        let (app, _) = app(vec![]);

        let response = app
            .clone()
            .oneshot(get("/scheduler/status"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["running"], false);

        let response = app
            .clone()
            .oneshot(post("/scheduler/start", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["running"], true);
        assert!(body["started_at"].is_string());

        // Starting again is a 400
        let response = app
            .clone()
            .oneshot(post("/scheduler/start", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());

        let response = app
            .clone()
            .oneshot(post("/scheduler/stop", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["running"], false);

        let response = app
            .clone()
            .oneshot(post("/scheduler/stop", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent() {
        let (app, repo) = app(vec![seed_monitor(None)]);
        repo.insert_alert(&seed_alert()).await.unwrap();

        let body = serde_json::json!({ "acknowledged_by": "ops", "note": "looking" });
        let response = app
            .clone()
            .oneshot(post("/alerts/a-1/acknowledge", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let first = body_json(response).await;
        assert_eq!(first["status"], "acknowledged");
        assert_eq!(first["acknowledged_by"], "ops");

        // Second acknowledge is a no-op 200
        let response = app
            .clone()
            .oneshot(post("/alerts/a-1/acknowledge", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn acknowledge_unknown_alert_is_404() {
        let (app, _) = app(vec![]);
        let response = app
            .oneshot(post(
                "/alerts/nope/acknowledge",
                serde_json::json!({ "acknowledged_by": "ops" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recover_without_action_is_400() {
        let (app, repo) = app(vec![seed_monitor(None)]);
        repo.insert_alert(&seed_alert()).await.unwrap();

        let response = app
            .oneshot(post("/alerts/a-1/recover", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("no recovery action"));
    }

    #[tokio::test]
    async fn recover_returns_attempt_number() {
        let (app, repo) = app(vec![seed_monitor(Some("exit 0"))]);
        repo.insert_alert(&seed_alert()).await.unwrap();

        let response = app
            .oneshot(post("/alerts/a-1/recover", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["attempt_number"], 1);
    }

    #[tokio::test]
    async fn alerts_listing_filters_by_status() {
        let (app, repo) = app(vec![seed_monitor(None)]);
        repo.insert_alert(&seed_alert()).await.unwrap();

        let response = app.clone().oneshot(get("/alerts")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(get("/alerts?status=recovered"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body.as_array().unwrap().is_empty());

        let response = app
            .oneshot(get("/alerts?monitor_id=m-1&status=active"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn monitor_state_missing_is_404() {
        let (app, _) = app(vec![seed_monitor(None)]);
        let response = app.oneshot(get("/monitors/m-1/state")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
