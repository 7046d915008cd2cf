use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of an encryption job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Wire representation, e.g. `IN_PROGRESS`.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Completed and failed jobs accept no further lifecycle action
    /// other than `retry` from `FAILED`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "PAUSED" => Ok(JobStatus::Paused),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!(
                "unknown job status '{}'. valid statuses are: PENDING, IN_PROGRESS, PAUSED, COMPLETED, FAILED",
                other
            )),
        }
    }
}

/// Lifecycle action, shared by single-job commands and batch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Start,
    Pause,
    Resume,
    Stop,
    Retry,
}

impl JobAction {
    pub const ALL: [JobAction; 5] = [
        JobAction::Start,
        JobAction::Pause,
        JobAction::Resume,
        JobAction::Stop,
        JobAction::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Start => "start",
            JobAction::Pause => "pause",
            JobAction::Resume => "resume",
            JobAction::Stop => "stop",
            JobAction::Retry => "retry",
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(JobAction::Start),
            "pause" => Ok(JobAction::Pause),
            "resume" => Ok(JobAction::Resume),
            "stop" => Ok(JobAction::Stop),
            "retry" => Ok(JobAction::Retry),
            other => Err(format!("unsupported action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source_url: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly started job: in progress, no progress yet.
    pub fn started(source_url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            source_url: source_url.into(),
            status: JobStatus::InProgress,
            progress: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
