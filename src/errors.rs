use std::fmt;

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::models::{JobAction, JobStatus};

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Stable, machine-readable error codes exposed to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidFormat,
    ValidationError,
    JobStateError,
    NotFound,
    BatchOperationError,
    Unauthorized,
    Forbidden,
    Timeout,
    RateLimit,
    JobNotFound,
    BatchNotFound,
    InvalidState,
    InvalidAction,
    EncryptionFailed,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidFormat => "invalid_format",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::JobStateError => "job_state_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::BatchOperationError => "batch_operation_error",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::Timeout => "timeout",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::JobNotFound => "job_not_found",
            ErrorCode::BatchNotFound => "batch_not_found",
            ErrorCode::InvalidState => "invalid_state",
            ErrorCode::InvalidAction => "invalid_action",
            ErrorCode::EncryptionFailed => "encryption_failed",
            ErrorCode::ServiceUnavailable => "service_unavailable",
        }
    }

    /// Transport status class for this code.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidFormat
            | ErrorCode::ValidationError
            | ErrorCode::BatchOperationError
            | ErrorCode::InvalidAction => StatusCode::BAD_REQUEST,
            ErrorCode::JobStateError | ErrorCode::InvalidState => StatusCode::CONFLICT,
            ErrorCode::NotFound | ErrorCode::JobNotFound | ErrorCode::BatchNotFound => {
                StatusCode::NOT_FOUND
            }
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::EncryptionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Only timeout, unavailable and rate-limit classes are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status(),
            StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
        )
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Structured payloads
// ---------------------------------------------------------------------------

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {} (value: {})", self.field, self.message, value),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// An action was requested against a job whose status forbids it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "invalid job state transition: cannot {action} job {job_id} (current state: {current_status}) - {reason}"
)]
pub struct JobStateError {
    pub job_id: String,
    pub current_status: JobStatus,
    pub action: JobAction,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Job,
    Batch,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Job => f.write_str("job"),
            Resource::Batch => f.write_str("batch"),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("invalid request format: {0}")]
    InvalidFormat(String),

    #[error(transparent)]
    State(#[from] JobStateError),

    #[error("{resource} not found: {id}")]
    NotFound { resource: Resource, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{context}: {message}")]
    Operation { context: String, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ServiceError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn job_not_found(id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            resource: Resource::Job,
            id: id.into(),
        }
    }

    pub fn batch_not_found(id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            resource: Resource::Batch,
            id: id.into(),
        }
    }

    pub fn operation(context: impl Into<String>, err: impl fmt::Display) -> Self {
        ServiceError::Operation {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Convert a store failure. Stores report domain conditions such as a
    /// duplicate id by returning a `ServiceError` inside the `anyhow::Error`;
    /// those are passed through, anything else is an operation failure.
    pub fn from_store(context: &str, err: anyhow::Error) -> Self {
        match err.downcast::<ServiceError>() {
            Ok(service_err) => service_err,
            Err(other) => ServiceError::operation(context, format!("{:#}", other)),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Validation(_) => ErrorCode::ValidationError,
            ServiceError::InvalidFormat(_) => ErrorCode::InvalidFormat,
            ServiceError::State(_) => ErrorCode::JobStateError,
            ServiceError::NotFound {
                resource: Resource::Job,
                ..
            } => ErrorCode::JobNotFound,
            ServiceError::NotFound {
                resource: Resource::Batch,
                ..
            } => ErrorCode::BatchNotFound,
            ServiceError::Conflict(_) => ErrorCode::InvalidState,
            ServiceError::Operation { .. } => ErrorCode::EncryptionFailed,
            ServiceError::Timeout(_) => ErrorCode::Timeout,
            ServiceError::Unavailable(_) => ErrorCode::ServiceUnavailable,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}
