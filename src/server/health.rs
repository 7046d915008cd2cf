use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub jobs: String,
    pub batches: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub stores: StoreHealth,
    pub data_dir: String,
}

fn describe(check: Result<(), crate::errors::ServiceError>) -> (bool, String) {
    match check {
        Ok(()) => (true, "ok".to_string()),
        Err(e) => (false, e.to_string()),
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Health check");

    let (jobs_ok, jobs) = describe(state.jobs.health().await);
    let (batches_ok, batches) = describe(state.batches.health().await);
    let healthy = jobs_ok && batches_ok;

    let data_dir = state
        .config
        .data_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        stores: StoreHealth { jobs, batches },
        data_dir,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        tracing::warn!("Health check degraded: {:?}", response.stores);
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}
