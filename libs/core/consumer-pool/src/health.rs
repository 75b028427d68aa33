//! Liveness, readiness and metrics endpoints for processes hosting a pool.
//!
//! - `/health`, `/healthz`: always 200 while the process serves HTTP
//! - `/ready`, `/readyz`: 200 while at least one worker is alive and every
//!   registered [`ReadinessCheck`] passes
//! - `/metrics`: Prometheus exposition

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::metrics;
use crate::pool::{PoolHandle, WorkerState};

/// An external dependency the process needs to be ready (database, cache, ...)
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<(), String>;
}

#[derive(Clone)]
pub struct HealthState {
    pub app_name: String,
    pub app_version: String,
    pub pool: PoolHandle,
    checks: Vec<Arc<dyn ReadinessCheck>>,
}

impl HealthState {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>, pool: PoolHandle) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            pool,
            checks: Vec::new(),
        }
    }

    pub fn with_check(mut self, check: Arc<dyn ReadinessCheck>) -> Self {
        self.checks.push(check);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

fn state_label(state: WorkerState) -> &'static str {
    match state {
        WorkerState::Idle => "idle",
        WorkerState::Polling => "polling",
        WorkerState::Processing => "processing",
        WorkerState::Stopped => "stopped",
    }
}

pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let workers: Vec<&'static str> = state
        .pool
        .worker_states()
        .into_iter()
        .map(state_label)
        .collect();
    let mut ready = state.pool.is_running() && !state.pool.stop_requested();

    let mut checks = Map::new();
    for check in &state.checks {
        let outcome = match check.check().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                ready = false;
                format!("error: {}", e)
            }
        };
        checks.insert(check.name().to_string(), Value::String(outcome));
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "workers": workers,
            "checks": checks,
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
