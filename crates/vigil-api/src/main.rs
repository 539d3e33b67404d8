mod errors;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vigil_core::{DynamoRepository, MemoryRepository, Monitor, Repository, SystemClock};
use vigil_engine::{
    EngineConfig, Evaluator, Notifier, ProbeRegistry, RecoveryExecutor, Scheduler,
};

use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Configuration from environment
    let config = EngineConfig::from_env();
    let bind_addr = std::env::var("VIGIL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let store_kind = std::env::var("VIGIL_STORE").unwrap_or_else(|_| "memory".to_string());

    tracing::info!(%bind_addr, store = %store_kind, "Starting vigil-api");

    let repo: Arc<dyn Repository> = match store_kind.as_str() {
        "dynamo" => {
            let prefix =
                std::env::var("VIGIL_TABLE_PREFIX").unwrap_or_else(|_| "vigil".to_string());
            Arc::new(DynamoRepository::new(&prefix).await)
        }
        _ => {
            let repo = Arc::new(MemoryRepository::new());
            seed_monitors(repo.as_ref()).await;
            repo
        }
    };

    let clock = Arc::new(SystemClock);
    let probes = Arc::new(ProbeRegistry::new());
    let notifier = Arc::new(Notifier::new(repo.clone(), clock.clone(), &config));
    let evaluator = Arc::new(Evaluator::new(
        repo.clone(),
        probes,
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

    // The scheduler is the one long-lived engine instance; start it unless
    // the operator wants manual control
    let autostart = std::env::var("VIGIL_AUTOSTART")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    if autostart {
        if let Err(e) = scheduler.start().await {
            tracing::error!(error = %e, "scheduler autostart failed");
        }
    }

    let state = AppState {
        scheduler: scheduler.clone(),
        repo,
        recovery,
        notifier,
        clock,
    };

    // Build router
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // Bind and serve
    let addr: SocketAddr = bind_addr.parse().expect("Invalid VIGIL_BIND_ADDR");
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Let in-flight evaluations drain before the process exits
    if scheduler.is_running() {
        if let Err(e) = scheduler.stop().await {
            tracing::warn!(error = %e, "scheduler did not stop cleanly");
        }
    }
}

/// Seed monitor definitions from `VIGIL_MONITORS_FILE` (a JSON array of
/// monitors). Definitions failing validation are skipped. Monitor CRUD
/// itself lives outside this service; this is only a boot-time load for
/// the in-memory store.
async fn seed_monitors(repo: &dyn Repository) {
    let Ok(path) = std::env::var("VIGIL_MONITORS_FILE") else {
        return;
    };
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(%path, error = %e, "cannot read monitors file");
            return;
        }
    };
    let monitors: Vec<Monitor> = match serde_json::from_str(&contents) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(%path, error = %e, "cannot parse monitors file");
            return;
        }
    };
    for monitor in monitors {
        if let Err(e) = monitor.validate() {
            tracing::error!(monitor = %monitor.name, error = %e, "invalid monitor skipped");
            continue;
        }
        if let Err(e) = repo.upsert_monitor(&monitor).await {
            tracing::error!(monitor = %monitor.name, error = %e, "cannot store monitor");
        }
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
