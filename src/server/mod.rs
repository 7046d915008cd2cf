pub mod error;
pub mod health;
pub mod routes;

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::{BatchOrchestrator, JobService};
use crate::models::ServiceConfig;
use crate::storage::{BatchStore, JobStore};

/// Shared application state for the Axum server.
pub struct AppState {
    pub jobs: Arc<JobService>,
    pub batches: Arc<BatchOrchestrator>,
    pub config: Arc<ServiceConfig>,
    pub start_time: Instant,
    /// Cancelled when the service begins shutting down; batches run on child tokens.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        batch_store: Arc<dyn BatchStore>,
        config: Arc<ServiceConfig>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let timeout = config.store_timeout();
        let jobs = Arc::new(JobService::new(job_store, timeout));
        let batches = Arc::new(BatchOrchestrator::new(jobs.clone(), batch_store, timeout));
        Arc::new(Self {
            jobs,
            batches,
            config,
            start_time: Instant::now(),
            shutdown,
        })
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/encrypt", post(routes::encrypt))
        .route("/status/{job_id}", get(routes::get_status))
        .route("/job/{job_id}/pause", post(routes::pause_job))
        .route("/job/{job_id}/resume", post(routes::resume_job))
        .route("/job/{job_id}/stop", post(routes::stop_job))
        .route("/job/{job_id}/retry", post(routes::retry_job))
        .route("/job/{job_id}/history", get(routes::job_history))
        .route("/jobs", get(routes::list_jobs))
        .route("/jobs/status", get(routes::jobs_summary))
        .route("/jobs/sort-options", get(routes::sort_options))
        .route(
            "/batch",
            get(routes::list_batches).post(routes::process_batch),
        )
        .route("/batch/{batch_id}", get(routes::get_batch))
        .route("/engine/stop", post(routes::stop_engine));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
