use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::lifecycle::{self, Transition};
use super::query::{self, JobPage, JobsSummary};
use super::with_deadline;
use crate::errors::ServiceError;
use crate::models::{Job, JobAction, JobFilter, JobHistoryEntry, JobSort};
use crate::storage::JobStore;

const STOPPED_BY_REQUEST: &str = "job stopped by request";

/// Single-job commands and queries.
///
/// Every command re-fetches the job before deciding a transition; nothing is
/// cached between calls. History appends are best-effort.
pub struct JobService {
    store: Arc<dyn JobStore>,
    store_timeout: Duration,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Create a new in-progress job without recording history.
    pub async fn create(&self, source_url: &str) -> Result<Job, ServiceError> {
        let source_url = source_url.trim();
        if source_url.is_empty() {
            return Err(ServiceError::validation(
                "source_url",
                "source URL cannot be empty",
            ));
        }

        let job = Job::started(source_url, Utc::now());
        with_deadline(
            self.store_timeout,
            "failed to create job",
            self.store.create_job(&job),
        )
        .await?;

        tracing::info!("Job {} created for {}", job.id, job.source_url);
        Ok(job)
    }

    pub async fn start(&self, source_url: &str) -> Result<Job, ServiceError> {
        let job = self.create(source_url).await?;
        self.record(&job.id, JobHistoryEntry::new(JobAction::Start.as_str(), "created"))
            .await;
        Ok(job)
    }

    /// Append a history entry, logging instead of failing when the store refuses.
    pub async fn record(&self, job_id: &str, entry: JobHistoryEntry) {
        let result = with_deadline(
            self.store_timeout,
            "failed to append history",
            self.store.append_history(job_id, entry),
        )
        .await;
        if let Err(e) = result {
            tracing::error!("Failed to record history for job {}: {}", job_id, e);
        }
    }

    pub async fn get(&self, job_id: &str) -> Result<Job, ServiceError> {
        with_deadline(
            self.store_timeout,
            "failed to get job",
            self.store.get_job(job_id),
        )
        .await?
        .ok_or_else(|| ServiceError::job_not_found(job_id))
    }

    pub async fn pause(&self, job_id: &str) -> Result<Job, ServiceError> {
        self.apply(job_id, JobAction::Pause, None).await
    }

    pub async fn resume(&self, job_id: &str) -> Result<Job, ServiceError> {
        self.apply(job_id, JobAction::Resume, None).await
    }

    pub async fn stop(&self, job_id: &str) -> Result<Job, ServiceError> {
        self.apply(job_id, JobAction::Stop, None).await
    }

    /// Start a new job from a failed job's source. Returns the new job.
    pub async fn retry(&self, job_id: &str) -> Result<Job, ServiceError> {
        self.apply(job_id, JobAction::Retry, None).await
    }

    /// Fetch, check and execute `action` against a job.
    pub async fn apply(
        &self,
        job_id: &str,
        action: JobAction,
        batch_id: Option<&str>,
    ) -> Result<Job, ServiceError> {
        let job = self.get(job_id).await?;
        let transition = lifecycle::check(&job, action).map_err(|e| {
            tracing::warn!("Rejected {} on job {}: {}", action, job_id, e.reason);
            e
        })?;
        self.execute(job, action, transition, batch_id).await
    }

    /// Carry out an already-checked transition.
    ///
    /// For [`Transition::Respawn`] the returned job is the newly created one.
    pub async fn execute(
        &self,
        mut job: Job,
        action: JobAction,
        transition: Transition,
        batch_id: Option<&str>,
    ) -> Result<Job, ServiceError> {
        let entry = match transition {
            Transition::To(status) => {
                let expected = job.status;
                job.status = status;
                job.updated_at = Utc::now();
                if action == JobAction::Stop {
                    job.error = Some(STOPPED_BY_REQUEST.to_string());
                }
                let written = with_deadline(
                    self.store_timeout,
                    "failed to update job",
                    self.store.update_job(&job, expected),
                )
                .await;
                if let Err(e) = written {
                    return Err(self.explain_lost_update(&job.id, action, e).await);
                }
                tracing::info!("Job {} {} -> {}", job.id, action, status);
                JobHistoryEntry::new(action.as_str(), status.as_str())
            }
            Transition::Respawn => {
                let original_id = job.id.clone();
                job = self.create(&job.source_url).await?;
                tracing::info!("Job {} retried as {}", original_id, job.id);
                JobHistoryEntry::new(action.as_str(), "created").with_detail("retried_from", original_id)
            }
        };

        let entry = match batch_id {
            Some(batch_id) => entry.with_batch(batch_id),
            None => entry,
        };
        self.record(&job.id, entry).await;
        Ok(job)
    }

    /// The job changed between the check and the write. Re-check `action`
    /// against the current record so the caller sees the state error a fresh
    /// request would get; otherwise the conflict is returned as is.
    async fn explain_lost_update(
        &self,
        job_id: &str,
        action: JobAction,
        err: ServiceError,
    ) -> ServiceError {
        let ServiceError::Conflict(reason) = err else {
            return err;
        };
        tracing::warn!("Lost update on job {}: {}", job_id, reason);
        match self.get(job_id).await {
            Ok(current) => match lifecycle::check(&current, action) {
                Err(e) => ServiceError::State(e),
                Ok(_) => ServiceError::Conflict(reason),
            },
            Err(_) => ServiceError::Conflict(reason),
        }
    }

    pub async fn history(&self, job_id: &str) -> Result<Vec<JobHistoryEntry>, ServiceError> {
        self.get(job_id).await?;
        with_deadline(
            self.store_timeout,
            "failed to get job history",
            self.store.get_history(job_id),
        )
        .await
    }

    /// Filter, sort and paginate the stored jobs. Sort criteria are
    /// validated before the store is touched.
    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
        filter: &JobFilter,
        sort: &JobSort,
    ) -> Result<JobPage, ServiceError> {
        let criteria = query::parse_sort(sort)?;
        let jobs = with_deadline(
            self.store_timeout,
            "failed to list jobs",
            self.store.list_jobs(),
        )
        .await?;
        Ok(query::run(jobs, filter, criteria, limit, offset))
    }

    pub async fn summary(&self) -> Result<JobsSummary, ServiceError> {
        let jobs = with_deadline(
            self.store_timeout,
            "failed to list jobs",
            self.store.list_jobs(),
        )
        .await?;
        Ok(query::summarize(&jobs, Utc::now()))
    }

    pub async fn health(&self) -> Result<(), ServiceError> {
        with_deadline(
            self.store_timeout,
            "job store health check",
            self.store.health_check(),
        )
        .await
        .map_err(|e| ServiceError::Unavailable(e.to_string()))
    }
}
