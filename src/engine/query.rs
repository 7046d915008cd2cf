use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::errors::{FieldError, ServiceError};
use crate::models::{Job, JobFilter, JobSort, JobStatus};

pub const MAX_SORT_FIELDS: usize = 3;
const LATEST_JOBS: usize = 5;

// ---------------------------------------------------------------------------
// Sort criteria
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    CreatedAt,
    UpdatedAt,
    Progress,
    Status,
    SourceUrl,
    Id,
}

impl SortKey {
    pub const ALL: [SortKey; 6] = [
        SortKey::CreatedAt,
        SortKey::UpdatedAt,
        SortKey::Progress,
        SortKey::Status,
        SortKey::SourceUrl,
        SortKey::Id,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
            SortKey::Progress => "progress",
            SortKey::Status => "status",
            SortKey::SourceUrl => "source_url",
            SortKey::Id => "id",
        }
    }

    fn parse(token: &str) -> Option<Self> {
        let token = token.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == token)
    }

    /// Only free-text fields honour `case_sensitive`; `id` is always ordinal.
    fn is_text(&self) -> bool {
        matches!(self, SortKey::Status | SortKey::SourceUrl)
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "" | "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// A validated sort criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortCriterion {
    pub field: SortKey,
    pub order: SortOrder,
    pub case_sensitive: bool,
}

impl SortCriterion {
    pub fn new(field: SortKey, order: SortOrder) -> Self {
        Self {
            field,
            order,
            case_sensitive: false,
        }
    }

    fn compare(&self, a: &Job, b: &Job) -> Ordering {
        let ordering = match self.field {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::Progress => a.progress.total_cmp(&b.progress),
            SortKey::Status => compare_text(a.status.as_str(), b.status.as_str(), self.case_sensitive),
            SortKey::SourceUrl => compare_text(&a.source_url, &b.source_url, self.case_sensitive),
            SortKey::Id => a.id.cmp(&b.id),
        };
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

fn compare_text(a: &str, b: &str, case_sensitive: bool) -> Ordering {
    if case_sensitive {
        a.cmp(b)
    } else {
        a.to_lowercase().cmp(&b.to_lowercase())
    }
}

fn default_sort() -> Vec<SortCriterion> {
    vec![SortCriterion::new(SortKey::CreatedAt, SortOrder::Desc)]
}

fn valid_fields() -> String {
    SortKey::ALL
        .iter()
        .map(SortKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate caller-supplied sort criteria. An empty list yields the default
/// `created_at desc`. Every invalid token is reported, not just the first.
pub fn parse_sort(sort: &JobSort) -> Result<Vec<SortCriterion>, ServiceError> {
    if sort.fields.is_empty() {
        return Ok(default_sort());
    }

    let mut errors = Vec::new();
    if sort.fields.len() > MAX_SORT_FIELDS {
        errors.push(
            FieldError::new(
                "sort_by",
                format!("at most {} sort fields are allowed", MAX_SORT_FIELDS),
            )
            .with_value(sort.fields.len().to_string()),
        );
    }

    let mut criteria = Vec::with_capacity(sort.fields.len());
    for requested in &sort.fields {
        let field = SortKey::parse(&requested.field);
        let order = SortOrder::parse(&requested.order);
        if field.is_none() {
            errors.push(
                FieldError::new(
                    "sort_by",
                    format!(
                        "invalid sort field: {}. valid fields are: {}",
                        requested.field,
                        valid_fields()
                    ),
                )
                .with_value(requested.field.clone()),
            );
        }
        if order.is_none() {
            errors.push(
                FieldError::new(
                    "order",
                    format!(
                        "invalid sort order: {}. valid orders are: asc, desc",
                        requested.order
                    ),
                )
                .with_value(requested.order.clone()),
            );
        }
        if let (Some(field), Some(order)) = (field, order) {
            criteria.push(SortCriterion {
                field,
                order,
                case_sensitive: requested.case_sensitive,
            });
        }
    }

    if errors.is_empty() {
        Ok(criteria)
    } else {
        Err(ServiceError::Validation(errors))
    }
}

// ---------------------------------------------------------------------------
// Filter / sort / paginate
// ---------------------------------------------------------------------------

pub fn matches_filter(job: &Job, filter: &JobFilter) -> bool {
    if filter.status.is_some_and(|s| s != job.status) {
        return false;
    }
    if filter.start_date.is_some_and(|start| job.created_at < start) {
        return false;
    }
    if filter.end_date.is_some_and(|end| job.created_at > end) {
        return false;
    }
    if let Some(source) = filter.source_url.as_deref() {
        if !source.is_empty() && !job.source_url.contains(source) {
            return false;
        }
    }
    job.progress >= filter.min_progress.unwrap_or(0.0)
}

/// Stable multi-key sort; later criteria only break ties of earlier ones.
pub fn sort_jobs(jobs: &mut [Job], criteria: &[SortCriterion]) {
    jobs.sort_by(|a, b| {
        criteria
            .iter()
            .map(|c| c.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

/// Page out of an ordered list; out-of-range offsets give an empty page.
pub fn paginate(jobs: Vec<Job>, limit: usize, offset: usize) -> Vec<Job> {
    jobs.into_iter().skip(offset).take(limit).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    /// Number of jobs that matched the filter, before pagination.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub sort: Vec<SortCriterion>,
}

pub fn run(
    jobs: Vec<Job>,
    filter: &JobFilter,
    criteria: Vec<SortCriterion>,
    limit: usize,
    offset: usize,
) -> JobPage {
    let mut matched: Vec<Job> = jobs
        .into_iter()
        .filter(|job| matches_filter(job, filter))
        .collect();
    sort_jobs(&mut matched, &criteria);
    let total = matched.len();

    JobPage {
        jobs: paginate(matched, limit, offset),
        total,
        limit,
        offset,
        sort: criteria,
    }
}

// ---------------------------------------------------------------------------
// Summary statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct JobsSummary {
    pub total_jobs: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
    pub avg_progress: f64,
    /// Mean `updated_at - created_at` over completed jobs, in seconds.
    pub avg_completion_secs: f64,
    pub success_rate: f64,
    pub total_completed: usize,
    pub total_failed: usize,
    pub jobs_last_24h: usize,
    pub jobs_last_week: usize,
    pub latest_jobs: Vec<Job>,
}

pub fn summarize(jobs: &[Job], now: DateTime<Utc>) -> JobsSummary {
    let mut by_status: BTreeMap<JobStatus, usize> =
        JobStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for job in jobs {
        *by_status.entry(job.status).or_default() += 1;
    }

    let total = jobs.len();
    let total_completed = by_status[&JobStatus::Completed];
    let total_failed = by_status[&JobStatus::Failed];

    let avg_progress = if total == 0 {
        0.0
    } else {
        jobs.iter().map(|j| j.progress).sum::<f64>() / total as f64
    };

    let avg_completion_secs = if total_completed == 0 {
        0.0
    } else {
        let sum_ms: i64 = jobs
            .iter()
            .filter(|j| j.status == JobStatus::Completed)
            .map(|j| (j.updated_at - j.created_at).num_milliseconds())
            .sum();
        sum_ms as f64 / 1000.0 / total_completed as f64
    };

    let success_rate = if total == 0 {
        0.0
    } else {
        total_completed as f64 / total as f64 * 100.0
    };

    let day_ago = now - Duration::hours(24);
    let week_ago = now - Duration::days(7);

    let mut latest_jobs = jobs.to_vec();
    sort_jobs(&mut latest_jobs, &default_sort());
    latest_jobs.truncate(LATEST_JOBS);

    JobsSummary {
        total_jobs: total,
        by_status,
        avg_progress,
        avg_completion_secs,
        success_rate,
        total_completed,
        total_failed,
        jobs_last_24h: jobs.iter().filter(|j| j.created_at > day_ago).count(),
        jobs_last_week: jobs.iter().filter(|j| j.created_at > week_ago).count(),
        latest_jobs,
    }
}

/// Discovery document for the listing endpoint's sort parameters.
pub fn sort_options() -> Value {
    let fields: Vec<Value> = SortKey::ALL
        .iter()
        .map(|key| {
            let kind = match key {
                SortKey::CreatedAt | SortKey::UpdatedAt => "timestamp",
                SortKey::Progress => "number",
                SortKey::Status | SortKey::SourceUrl => "text",
                SortKey::Id => "identifier",
            };
            json!({
                "name": key.as_str(),
                "type": kind,
                "case_sensitive_option": key.is_text(),
            })
        })
        .collect();

    json!({
        "fields": fields,
        "orders": ["asc", "desc"],
        "max_sort_fields": MAX_SORT_FIELDS,
        "default": { "field": "created_at", "order": "desc" },
        "usage": "sort_by=status,created_at&order=asc,desc&case_sensitive=false,false",
    })
}
