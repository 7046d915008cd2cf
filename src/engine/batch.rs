use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::jobs::JobService;
use super::lifecycle;
use super::with_deadline;
use crate::errors::{FieldError, ServiceError};
use crate::models::{
    BatchFilter, BatchJobError, BatchOperation, BatchResult, BatchSummary, JobAction,
    JobHistoryEntry, NO_JOB_ID,
};
use crate::storage::BatchStore;

const CANCELLED: &str = "batch cancelled before this item was processed";

/// A validated batch request, one variant per action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchCommand {
    Start(Vec<String>),
    Pause(Vec<String>),
    Resume(Vec<String>),
    Stop(Vec<String>),
    Retry(Vec<String>),
}

impl BatchCommand {
    pub fn action(&self) -> JobAction {
        match self {
            BatchCommand::Start(_) => JobAction::Start,
            BatchCommand::Pause(_) => JobAction::Pause,
            BatchCommand::Resume(_) => JobAction::Resume,
            BatchCommand::Stop(_) => JobAction::Stop,
            BatchCommand::Retry(_) => JobAction::Retry,
        }
    }

    /// Source URLs for start, job ids for every other action.
    pub fn items(&self) -> &[String] {
        match self {
            BatchCommand::Start(items)
            | BatchCommand::Pause(items)
            | BatchCommand::Resume(items)
            | BatchCommand::Stop(items)
            | BatchCommand::Retry(items) => items,
        }
    }
}

fn check_items(field: &str, items: &[String], empty_message: &str, errors: &mut Vec<FieldError>) {
    for (i, item) in items.iter().enumerate() {
        if item.trim().is_empty() {
            errors.push(FieldError::new(format!("{}[{}]", field, i), empty_message));
        }
    }
}

impl TryFrom<BatchOperation> for BatchCommand {
    type Error = ServiceError;

    /// Collects every shape violation before giving up.
    fn try_from(op: BatchOperation) -> Result<Self, Self::Error> {
        let action_token = op.action.trim();
        if action_token.is_empty() {
            return Err(ServiceError::validation("action", "action is required"));
        }
        let action: JobAction = action_token.parse().map_err(|_| {
            ServiceError::Validation(vec![
                FieldError::new("action", "unsupported action").with_value(action_token)
            ])
        })?;

        let mut errors = Vec::new();
        if action == JobAction::Start {
            if op.source_urls.is_empty() {
                errors.push(FieldError::new(
                    "source_urls",
                    "at least one source URL is required for start action",
                ));
            }
            check_items("source_urls", &op.source_urls, "source URL cannot be empty", &mut errors);
            if !op.job_ids.is_empty() {
                errors.push(
                    FieldError::new("job_ids", "job_ids should not be provided for start action")
                        .with_value(op.job_ids.join(",")),
                );
            }
        } else {
            if op.job_ids.is_empty() {
                errors.push(FieldError::new(
                    "job_ids",
                    format!("at least one job ID is required for {} action", action),
                ));
            }
            check_items("job_ids", &op.job_ids, "job ID cannot be empty", &mut errors);
            if !op.source_urls.is_empty() {
                errors.push(
                    FieldError::new(
                        "source_urls",
                        format!("source_urls should not be provided for {} action", action),
                    )
                    .with_value(op.source_urls.join(",")),
                );
            }
        }

        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }

        Ok(match action {
            JobAction::Start => BatchCommand::Start(op.source_urls),
            JobAction::Pause => BatchCommand::Pause(op.job_ids),
            JobAction::Resume => BatchCommand::Resume(op.job_ids),
            JobAction::Stop => BatchCommand::Stop(op.job_ids),
            JobAction::Retry => BatchCommand::Retry(op.job_ids),
        })
    }
}

#[derive(Default)]
struct Outcome {
    successful: Vec<String>,
    failed: Vec<BatchJobError>,
}

impl Outcome {
    fn fail(&mut self, job_id: impl Into<String>, error: impl Into<String>) {
        self.failed.push(BatchJobError {
            job_id: job_id.into(),
            error: error.into(),
        });
    }
}

/// Runs one action over many jobs and records the aggregate.
pub struct BatchOrchestrator {
    jobs: Arc<JobService>,
    batches: Arc<dyn BatchStore>,
    store_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(jobs: Arc<JobService>, batches: Arc<dyn BatchStore>, store_timeout: Duration) -> Self {
        Self {
            jobs,
            batches,
            store_timeout,
        }
    }

    /// Validate, dispatch item by item in input order, then persist the result.
    ///
    /// Item failures land in `failed` and never stop the batch. Cancellation is
    /// honoured between items: the remaining items are recorded as failed and
    /// the partial result is still stored.
    pub async fn process_batch(
        &self,
        op: BatchOperation,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, ServiceError> {
        let command = BatchCommand::try_from(op).map_err(|e| {
            tracing::warn!("Rejected batch request: {}", e);
            e
        })?;

        let batch_id = format!("batch_{}", Uuid::now_v7());
        let action = command.action();
        let items = command.items();
        let total_jobs = items.len();
        let start_time = Utc::now();
        tracing::info!(
            "Batch {} started: {} over {} item(s)",
            batch_id,
            action,
            total_jobs
        );

        let mut outcome = Outcome::default();
        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    "Batch {} cancelled with {} item(s) unprocessed",
                    batch_id,
                    total_jobs - index
                );
                for rest in &items[index..] {
                    let job_id = match &command {
                        BatchCommand::Start(_) => NO_JOB_ID,
                        BatchCommand::Pause(_)
                        | BatchCommand::Resume(_)
                        | BatchCommand::Stop(_)
                        | BatchCommand::Retry(_) => rest.as_str(),
                    };
                    outcome.fail(job_id, CANCELLED);
                }
                break;
            }

            match &command {
                BatchCommand::Start(_) => {
                    self.start_item(&batch_id, item, total_jobs, &mut outcome)
                        .await
                }
                BatchCommand::Pause(_)
                | BatchCommand::Resume(_)
                | BatchCommand::Stop(_)
                | BatchCommand::Retry(_) => {
                    self.transition_item(&batch_id, action, item, &mut outcome)
                        .await
                }
            }
        }

        let end_time = Utc::now();
        let result = BatchResult {
            batch_id,
            action,
            start_time,
            end_time,
            summary: BatchSummary {
                total_jobs,
                success_count: outcome.successful.len(),
                failure_count: outcome.failed.len(),
                duration_ms: (end_time - start_time).num_milliseconds(),
            },
            successful: outcome.successful,
            failed: outcome.failed,
        };

        with_deadline(
            self.store_timeout,
            "failed to store batch result",
            self.batches.store_batch_result(&result),
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to store batch result {}: {}", result.batch_id, e);
            e
        })?;

        tracing::info!(
            "Batch {} finished: {} succeeded, {} failed ({})",
            result.batch_id,
            result.summary.success_count,
            result.summary.failure_count,
            result.status()
        );
        Ok(result)
    }

    async fn start_item(
        &self,
        batch_id: &str,
        source_url: &str,
        batch_size: usize,
        outcome: &mut Outcome,
    ) {
        match self.jobs.create(source_url).await {
            Ok(job) => {
                let entry = JobHistoryEntry::new(JobAction::Start.as_str(), "created")
                    .with_batch(batch_id)
                    .with_detail("batch_operation", true)
                    .with_detail("batch_size", batch_size);
                self.jobs.record(&job.id, entry).await;
                outcome.successful.push(job.id);
            }
            Err(e) => {
                outcome.fail(
                    NO_JOB_ID,
                    format!("Failed to create job for {}: {}", source_url, e),
                );
            }
        }
    }

    async fn transition_item(
        &self,
        batch_id: &str,
        action: JobAction,
        job_id: &str,
        outcome: &mut Outcome,
    ) {
        let job = match self.jobs.get(job_id).await {
            Ok(job) => job,
            Err(e @ ServiceError::NotFound { .. }) => return outcome.fail(job_id, e.to_string()),
            Err(e) => return outcome.fail(job_id, format!("failed to fetch job {}: {}", job_id, e)),
        };

        let transition = match lifecycle::check(&job, action) {
            Ok(transition) => transition,
            Err(e) => return outcome.fail(job_id, e.to_string()),
        };

        match self
            .jobs
            .execute(job, action, transition, Some(batch_id))
            .await
        {
            Ok(_) => outcome.successful.push(job_id.to_string()),
            Err(e) => outcome.fail(job_id, format!("failed to {} job {}: {}", action, job_id, e)),
        }
    }

    pub async fn get_batch_result(&self, batch_id: &str) -> Result<BatchResult, ServiceError> {
        with_deadline(
            self.store_timeout,
            "failed to get batch result",
            self.batches.get_batch_result(batch_id),
        )
        .await?
        .ok_or_else(|| ServiceError::batch_not_found(batch_id))
    }

    pub async fn list_batch_results(
        &self,
        filter: &BatchFilter,
    ) -> Result<Vec<BatchResult>, ServiceError> {
        with_deadline(
            self.store_timeout,
            "failed to list batch results",
            self.batches.list_batch_results(filter),
        )
        .await
    }

    pub async fn health(&self) -> Result<(), ServiceError> {
        with_deadline(
            self.store_timeout,
            "batch store health check",
            self.batches.health_check(),
        )
        .await
        .map_err(|e| ServiceError::Unavailable(e.to_string()))
    }
}
