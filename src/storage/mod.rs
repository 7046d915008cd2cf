pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{BatchFilter, BatchResult, Job, JobHistoryEntry, JobStatus};

/// Persistence for job records and their append-only history logs.
///
/// Implementations report a duplicate id from `create_job` as
/// `ServiceError::Conflict` so callers can tell it apart from I/O failures.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;
    /// Replace the stored job only if its status is still `expected`.
    /// A mismatch is reported as `ServiceError::Conflict` and nothing is written.
    async fn update_job(&self, job: &Job, expected: JobStatus) -> Result<()>;
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;
    async fn list_jobs(&self) -> Result<Vec<Job>>;
    async fn delete_job(&self, id: &str) -> Result<()>;
    async fn append_history(&self, job_id: &str, entry: JobHistoryEntry) -> Result<()>;
    async fn get_history(&self, job_id: &str) -> Result<Vec<JobHistoryEntry>>;
    async fn health_check(&self) -> Result<()>;
}

/// Persistence for immutable batch results.
#[async_trait]
pub trait BatchStore: Send + Sync {
    async fn store_batch_result(&self, result: &BatchResult) -> Result<()>;
    async fn get_batch_result(&self, batch_id: &str) -> Result<Option<BatchResult>>;
    async fn list_batch_results(&self, filter: &BatchFilter) -> Result<Vec<BatchResult>>;
    async fn health_check(&self) -> Result<()>;
}
