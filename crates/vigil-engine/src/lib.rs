pub mod classify;
pub mod config;
pub mod errors;
pub mod evaluator;
pub mod notify;
pub mod probes;
pub mod recovery;
pub mod scheduler;
pub mod state_machine;

pub use config::{EngineConfig, SmtpConfig};
pub use errors::EngineError;
pub use evaluator::{EvalOutcome, Evaluator};
pub use notify::Notifier;
pub use probes::{Probe, ProbeDispatch, ProbeRegistry};
pub use recovery::RecoveryExecutor;
pub use scheduler::{RunState, Scheduler, TickSummary};
