use std::sync::Arc;

use vigil_core::{Clock, Repository};
use vigil_engine::{Notifier, RecoveryExecutor, Scheduler};

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub repo: Arc<dyn Repository>,
    pub recovery: Arc<RecoveryExecutor>,
    pub notifier: Arc<Notifier>,
    pub clock: Arc<dyn Clock>,
}
