use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{ApiError, ErrorContext};
use super::AppState;
use crate::engine::query::{self, SortCriterion};
use crate::errors::{FieldError, ServiceError};
use crate::models::{
    BatchFilter, BatchOperation, BatchResult, BatchStatus, Job, JobAction, JobFilter, JobSort, JobStatus,
    SortField,
};

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/encrypt`: either a single source or a batch.
#[derive(Debug, Deserialize)]
pub struct EncryptRequest {
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub batch: bool,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub job_ids: Vec<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StartedResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retried_from: Option<String>,
}

impl StartedResponse {
    fn from_job(job: &Job, retried_from: Option<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            created_at: job.created_at,
            retried_from,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub pagination: Pagination,
    pub filter: JobFilter,
    pub sort: Vec<SortCriterion>,
}

#[derive(Debug, Serialize)]
pub struct ListBatchesResponse {
    pub batches: Vec<BatchResult>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Query params
// ---------------------------------------------------------------------------

/// Raw listing parameters; parsed by hand so every bad value is reported.
#[derive(Debug, Deserialize, Default)]
pub struct ListJobsParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub status: Option<String>,
    pub source_url: Option<String>,
    pub min_progress: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub case_sensitive: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListBatchesParams {
    pub status: Option<String>,
    pub action: Option<String>,
    pub job_ids: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub min_success: Option<String>,
    pub max_failures: Option<String>,
}

/// Accepts unix seconds or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn non_empty(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_timestamp_param(
    field: &str,
    raw: &Option<String>,
    errors: &mut Vec<FieldError>,
) -> Option<DateTime<Utc>> {
    let raw = non_empty(raw)?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        errors.push(
            FieldError::new(field, "expected unix seconds or an RFC 3339 timestamp")
                .with_value(raw),
        );
    }
    parsed
}

fn parse_count_param(
    field: &str,
    raw: &Option<String>,
    errors: &mut Vec<FieldError>,
) -> Option<usize> {
    let raw = non_empty(raw)?;
    match raw.parse::<usize>() {
        Ok(n) => Some(n),
        Err(_) => {
            errors.push(FieldError::new(field, "must be a non-negative integer").with_value(raw));
            None
        }
    }
}

/// Non-positive limits fall back to the default; negative offsets become 0.
fn parse_paging(
    params: &ListJobsParams,
    errors: &mut Vec<FieldError>,
) -> (Option<usize>, usize) {
    let mut parse_signed = |field: &str, raw: &Option<String>| -> Option<i64> {
        let raw = non_empty(raw)?;
        match raw.parse::<i64>() {
            Ok(n) => Some(n),
            Err(_) => {
                errors.push(FieldError::new(field, "must be an integer").with_value(raw));
                None
            }
        }
    };
    let limit = parse_signed("limit", &params.limit)
        .filter(|n| *n > 0)
        .map(|n| n as usize);
    let offset = parse_signed("offset", &params.offset)
        .map(|n| n.max(0) as usize)
        .unwrap_or(0);
    (limit, offset)
}

/// Split a comma list keeping empty entries, so that positions in
/// `sort_by`, `order` and `case_sensitive` stay aligned.
fn split_positional(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split(',').map(|part| part.trim().to_string()).collect())
        .unwrap_or_default()
}

fn parse_job_sort(params: &ListJobsParams, errors: &mut Vec<FieldError>) -> JobSort {
    let fields = split_positional(non_empty(&params.sort_by));
    let orders = split_positional(params.order.as_deref());
    let case_flags = split_positional(params.case_sensitive.as_deref());

    let fields = fields
        .into_iter()
        .enumerate()
        .map(|(i, field)| {
            if field.is_empty() {
                errors.push(
                    FieldError::new("sort_by", "sort field cannot be empty")
                        .with_value(format!("position {}", i)),
                );
            }
            let mut sort_field = SortField::new(field, orders.get(i).cloned().unwrap_or_default());
            match case_flags.get(i).map(String::as_str) {
                None | Some("") | Some("false") => {}
                Some("true") => sort_field = sort_field.case_sensitive(),
                Some(other) => errors.push(
                    FieldError::new("case_sensitive", "must be true or false").with_value(other),
                ),
            }
            sort_field
        })
        .collect();
    JobSort { fields }
}

fn parse_job_filter(params: &ListJobsParams, errors: &mut Vec<FieldError>) -> JobFilter {
    let status = non_empty(&params.status).and_then(|raw| match raw.parse::<JobStatus>() {
        Ok(status) => Some(status),
        Err(message) => {
            errors.push(FieldError::new("status", message).with_value(raw));
            None
        }
    });
    let min_progress = non_empty(&params.min_progress).and_then(|raw| match raw.parse::<f64>() {
        Ok(p) if p.is_finite() => Some(p),
        _ => {
            errors.push(FieldError::new("min_progress", "must be a number").with_value(raw));
            None
        }
    });

    JobFilter {
        status,
        start_date: parse_timestamp_param("start_date", &params.start_date, errors),
        end_date: parse_timestamp_param("end_date", &params.end_date, errors),
        source_url: non_empty(&params.source_url).map(str::to_string),
        min_progress,
    }
}

fn parse_batch_filter(params: &ListBatchesParams) -> Result<BatchFilter, ServiceError> {
    let mut errors = Vec::new();

    let status = non_empty(&params.status).and_then(|raw| match raw.parse::<BatchStatus>() {
        Ok(status) => Some(status),
        Err(message) => {
            errors.push(FieldError::new("status", message).with_value(raw));
            None
        }
    });
    let action = non_empty(&params.action).and_then(|raw| match raw.parse::<JobAction>() {
        Ok(action) => Some(action),
        Err(message) => {
            errors.push(FieldError::new("action", message).with_value(raw));
            None
        }
    });

    let filter = BatchFilter {
        status,
        action,
        start_time: parse_timestamp_param("start_time", &params.start_time, &mut errors),
        end_time: parse_timestamp_param("end_time", &params.end_time, &mut errors),
        min_success: parse_count_param("min_success", &params.min_success, &mut errors),
        max_failures: parse_count_param("max_failures", &params.max_failures, &mut errors),
        job_ids: split_list(params.job_ids.as_deref()),
    };

    if errors.is_empty() {
        Ok(filter)
    } else {
        Err(ServiceError::Validation(errors))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/encrypt
pub async fn encrypt(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<EncryptRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = payload?;

    if req.batch {
        let op = BatchOperation {
            action: req.action.unwrap_or_default(),
            job_ids: req.job_ids,
            source_urls: req.source_urls,
        };
        let result = run_batch(&state, op).await?;
        return Ok((StatusCode::ACCEPTED, Json(result)).into_response());
    }

    let source_url = req.source_url.unwrap_or_default();
    let job = state.jobs.start(&source_url).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse::from_job(&job, None)),
    )
        .into_response())
}

/// GET /api/v1/status/{job_id}
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.get(&job_id).await?))
}

fn transitioned(job: Job, verb: &str) -> Json<TransitionResponse> {
    Json(TransitionResponse {
        job_id: job.id,
        status: job.status,
        message: format!("Job {} successfully", verb),
    })
}

/// POST /api/v1/job/{job_id}/pause
pub async fn pause_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
    let job = state.jobs.pause(&job_id).await?;
    Ok(transitioned(job, "paused"))
}

/// POST /api/v1/job/{job_id}/resume
pub async fn resume_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
    let job = state.jobs.resume(&job_id).await?;
    Ok(transitioned(job, "resumed"))
}

/// POST /api/v1/job/{job_id}/stop
pub async fn stop_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<TransitionResponse>> {
    let job = state.jobs.stop(&job_id).await?;
    Ok(transitioned(job, "stopped"))
}

/// POST /api/v1/job/{job_id}/retry
pub async fn retry_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job = state.jobs.retry(&job_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartedResponse::from_job(&job, Some(job_id))),
    ))
}

/// GET /api/v1/job/{job_id}/history
pub async fn job_history(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let history = state.jobs.history(&job_id).await?;
    Ok(Json(json!({ "job_id": job_id, "history": history })))
}

/// GET /api/v1/jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListJobsParams>, QueryRejection>,
) -> ApiResult<Json<ListJobsResponse>> {
    let Query(params) = params?;

    let mut errors = Vec::new();
    let (limit, offset) = parse_paging(&params, &mut errors);
    let filter = parse_job_filter(&params, &mut errors);
    let sort = parse_job_sort(&params, &mut errors);
    if !errors.is_empty() {
        return Err(ServiceError::Validation(errors).into());
    }

    let limit = state.config.page_limit(limit);
    let page = state.jobs.list(limit, offset, &filter, &sort).await?;

    Ok(Json(ListJobsResponse {
        pagination: Pagination {
            total: page.total,
            limit: page.limit,
            offset: page.offset,
            has_more: page.offset + page.jobs.len() < page.total,
        },
        jobs: page.jobs,
        filter,
        sort: page.sort,
    }))
}

/// GET /api/v1/jobs/status
pub async fn jobs_summary(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.jobs.summary().await?))
}

/// GET /api/v1/jobs/sort-options
pub async fn sort_options() -> impl IntoResponse {
    Json(query::sort_options())
}

async fn run_batch(state: &AppState, op: BatchOperation) -> ApiResult<BatchResult> {
    let context = ErrorContext::for_batch(&op);
    let cancel = state.shutdown.child_token();
    state
        .batches
        .process_batch(op, &cancel)
        .await
        .map_err(|e| ApiError::from(e).with_context(context))
}

/// POST /api/v1/batch
pub async fn process_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchOperation>, JsonRejection>,
) -> ApiResult<Json<BatchResult>> {
    let Json(op) = payload?;
    Ok(Json(run_batch(&state, op).await?))
}

/// GET /api/v1/batch
pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListBatchesParams>, QueryRejection>,
) -> ApiResult<Json<ListBatchesResponse>> {
    let Query(params) = params?;
    let filter = parse_batch_filter(&params)?;
    let batches = state.batches.list_batch_results(&filter).await?;
    Ok(Json(ListBatchesResponse {
        total: batches.len(),
        batches,
    }))
}

/// GET /api/v1/batch/{batch_id}
pub async fn get_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> ApiResult<Json<BatchResult>> {
    state
        .batches
        .get_batch_result(&batch_id)
        .await
        .map(Json)
        .map_err(|e| {
            ApiError::from(e).with_context(ErrorContext {
                batch_id: Some(batch_id.clone()),
                ..Default::default()
            })
        })
}

/// POST /api/v1/engine/stop
pub async fn stop_engine(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::info!("Engine stop requested via API");
    state.shutdown.cancel();
    (
        StatusCode::OK,
        Json(json!({
            "status": "stopping",
            "message": "Service is shutting down"
        })),
    )
}
