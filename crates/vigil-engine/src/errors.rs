use vigil_core::CoreError;

/// Errors surfaced by the engine's control operations.
///
/// Probe failures never appear here: a failed check is an `error` sample,
/// not an engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("alert not found: {0}")]
    AlertNotFound(String),

    #[error("monitor {0} has no recovery action configured")]
    NoRecoveryAction(String),

    #[error("recovery attempts exhausted for alert {0}")]
    RecoveryExhausted(String),

    #[error("recovery already in progress for alert {0}")]
    RecoveryConflict(String),

    #[error("monitor {0} is inside a maintenance window")]
    InMaintenance(String),

    #[error("monitor {0} is already being evaluated")]
    EvaluationInFlight(String),

    #[error("store error: {0}")]
    Repo(#[from] CoreError),
}
