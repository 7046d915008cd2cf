use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobAction;

/// Placeholder job id recorded for start items that never produced a job.
pub const NO_JOB_ID: &str = "N/A";

/// Raw batch request as received from a caller.
///
/// `action` stays a string so that unknown actions surface as field-level
/// validation errors instead of deserialization failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOperation {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub job_ids: Vec<String>,
    #[serde(default)]
    pub source_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJobError {
    pub job_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_jobs: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub action: JobAction,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub successful: Vec<String>,
    pub failed: Vec<BatchJobError>,
    pub summary: BatchSummary,
}

impl BatchResult {
    /// Outcome class derived from `success_count / total_jobs`.
    pub fn status(&self) -> BatchStatus {
        BatchStatus::classify(self.summary.success_count, self.summary.total_jobs)
    }

    /// Whether `job_id` appears in either the successful or failed list.
    pub fn mentions(&self, job_id: &str) -> bool {
        self.successful.iter().any(|id| id == job_id)
            || self.failed.iter().any(|f| f.job_id == job_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Partial,
    Failed,
}

impl BatchStatus {
    /// Every item succeeded => success, none => failed, otherwise partial.
    /// A batch with no items cannot be a success and counts as failed.
    pub fn classify(success_count: usize, total_jobs: usize) -> Self {
        if total_jobs == 0 || success_count == 0 {
            BatchStatus::Failed
        } else if success_count >= total_jobs {
            BatchStatus::Success
        } else {
            BatchStatus::Partial
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Success => "success",
            BatchStatus::Partial => "partial",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(BatchStatus::Success),
            "partial" => Ok(BatchStatus::Partial),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!(
                "unknown batch status '{}'. valid statuses are: success, partial, failed",
                other
            )),
        }
    }
}

/// Criteria for listing stored batch results. Every criterion that is set
/// must hold for a result to match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BatchStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<JobAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_success: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub job_ids: Vec<String>,
}

impl BatchFilter {
    pub fn matches(&self, result: &BatchResult) -> bool {
        if let Some(status) = self.status {
            if result.status() != status {
                return false;
            }
        }
        if let Some(action) = self.action {
            if result.action != action {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if result.start_time < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if result.start_time > end {
                return false;
            }
        }
        if let Some(min) = self.min_success {
            if result.summary.success_count < min {
                return false;
            }
        }
        if let Some(max) = self.max_failures {
            if result.summary.failure_count > max {
                return false;
            }
        }
        self.job_ids.iter().all(|id| result.mentions(id))
    }
}
