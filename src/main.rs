//! Aqueduct Worker
//!
//! Long-lived worker node of the Aqueduct workflow platform. Pulls encrypted
//! execution requests from the shared queue, runs them concurrently up to
//! the configured capacity, publishes per-step events to the central results
//! collector, and applies control-plane broadcasts (pause/abort, case
//! subscriptions) in real time.
//!
//! ## Background tasks
//!
//! - Control intake (SUB socket, fleet broadcast)
//! - Results writer (PUSH socket, single writer)
//! - Health surface (`GET /healthz`)

use std::sync::Arc;

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aqueduct_worker::config::Config;
use aqueduct_worker::metrics::{health_router, HealthState};
use aqueduct_worker::subscriptions::MemoryCaseLog;
use aqueduct_worker::worker::Worker;
use aqueduct_worker::workflow::MemoryStore;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aqueduct_worker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    info!("Starting Aqueduct worker");
    info!("Worker identity: {}", config.socket_identity());
    info!("Capacity: {}", config.capacity);
    info!("Results address: {}", config.results_address);
    info!("Control address: {}", config.control_address);

    // Validate critical config
    if config.queue_url.is_empty() {
        warn!("AQUEDUCT_QUEUE_URL not set - request intake will idle");
    }

    // Standalone runs carry in-memory stores; deployments embed the worker
    // as a library and inject their execution-db and case-db backends.
    let store = Arc::new(MemoryStore::default());
    let case_log = Arc::new(MemoryCaseLog::default());

    let worker = Worker::connect(&config, store, case_log)
        .await
        .expect("Failed to wire worker transports");

    // Health surface
    let health_state = HealthState {
        worker_id: config.worker_id.clone(),
        registry: worker.registry(),
        metrics: worker.metrics(),
    };
    let health_addr = config.health_addr.clone();
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(&health_addr)
            .await
            .expect("Failed to bind health address");
        info!("Health surface on {}", health_addr);
        if let Err(err) = axum::serve(listener, health_router(health_state)).await {
            warn!("Health surface stopped: {}", err);
        }
    });

    // Termination signals flip the shutdown flag; the flag is level-triggered
    // so a second signal during drain is harmless.
    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        loop {
            shutdown_signal().await;
            info!("Termination signal received");
            let _ = shutdown.send(true);
        }
    });

    let code = worker.run().await;
    info!("Aqueduct worker shutdown complete");
    std::process::exit(code);
}

/// Wait for a soft-termination signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
