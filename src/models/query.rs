use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobStatus;

/// Filtering options for job listings. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_progress: Option<f64>,
}

/// A single caller-supplied sort criterion, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub order: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl SortField {
    pub fn new(field: impl Into<String>, order: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: order.into(),
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }
}

/// Ordered sort criteria; the first field is primary, the rest break ties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSort {
    #[serde(default)]
    pub fields: Vec<SortField>,
}
