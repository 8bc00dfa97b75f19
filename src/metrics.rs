//! Drop counters and the operator health surface
//!
//! The worker has no user-facing API; operators observe it through the
//! published event stream, the process exit code, and `GET /healthz`, which
//! reports capacity usage and the counter set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::registry::WorkflowRegistry;

#[derive(Default)]
pub struct WorkerMetrics {
    frames_dropped: AtomicU64,
    crypto_failures: AtomicU64,
    events_dropped: AtomicU64,
    publish_errors: AtomicU64,
    requests_admitted: AtomicU64,
    workflows_completed: AtomicU64,
    workflows_failed: AtomicU64,
}

impl WorkerMetrics {
    pub fn inc_frames_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_crypto_failures(&self) {
        self.crypto_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish_errors(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_admitted(&self) {
        self.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_workflows_completed(&self) {
        self.workflows_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_workflows_failed(&self) {
        self.workflows_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn crypto_failures(&self) -> u64 {
        self.crypto_failures.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn requests_admitted(&self) -> u64 {
        self.requests_admitted.load(Ordering::Relaxed)
    }

    pub fn workflows_completed(&self) -> u64 {
        self.workflows_completed.load(Ordering::Relaxed)
    }

    pub fn workflows_failed(&self) -> u64 {
        self.workflows_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Value {
        json!({
            "frames_dropped": self.frames_dropped.load(Ordering::Relaxed),
            "crypto_failures": self.crypto_failures.load(Ordering::Relaxed),
            "events_dropped": self.events_dropped.load(Ordering::Relaxed),
            "publish_errors": self.publish_errors.load(Ordering::Relaxed),
            "requests_admitted": self.requests_admitted.load(Ordering::Relaxed),
            "workflows_completed": self.workflows_completed.load(Ordering::Relaxed),
            "workflows_failed": self.workflows_failed.load(Ordering::Relaxed),
        })
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub worker_id: String,
    pub registry: Arc<WorkflowRegistry>,
    pub metrics: Arc<WorkerMetrics>,
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "worker": state.worker_id,
        "capacity": state.registry.capacity(),
        "running": state.registry.len(),
        "counters": state.metrics.snapshot(),
    }))
}
