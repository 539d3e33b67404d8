use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use vigil_core::CoreError;
use vigil_engine::EngineError;

/// API error types with structured JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// Invalid request or state for the operation.
    BadRequest(String),
    /// Resource not found.
    NotFound(String),
    /// The operation conflicts with concurrent activity.
    Conflict(String),
    /// Internal server error.
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::AlreadyRunning
            | EngineError::NotRunning
            | EngineError::NoRecoveryAction(_)
            | EngineError::RecoveryExhausted(_) => ApiError::BadRequest(err.to_string()),
            EngineError::MonitorNotFound(_) | EngineError::AlertNotFound(_) => {
                ApiError::NotFound(err.to_string())
            }
            EngineError::RecoveryConflict(_)
            | EngineError::EvaluationInFlight(_)
            | EngineError::InMaintenance(_) => ApiError::Conflict(err.to_string()),
            EngineError::Repo(core) => core.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => ApiError::NotFound(msg),
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => {
                tracing::error!("store error: {other}");
                ApiError::Internal
            }
        }
    }
}
