use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::errors::{ErrorCode, ServiceError};
use crate::models::{BatchOperation, JobAction};

// ---------------------------------------------------------------------------
// Error response body
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<JobAction>,
}

/// Request context echoed back alongside batch failures.
#[derive(Debug, Default, Serialize)]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub job_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_urls: Vec<String>,
}

impl ErrorContext {
    pub fn for_batch(op: &BatchOperation) -> Self {
        Self {
            batch_id: None,
            action: Some(op.action.clone()).filter(|a| !a.is_empty()),
            job_ids: op.job_ids.clone(),
            source_urls: op.source_urls.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
    pub errors: Vec<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorContext>,
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// A `ServiceError` on its way out of a handler, optionally with request context.
#[derive(Debug)]
pub struct ApiError {
    pub error: ServiceError,
    pub context: Option<ErrorContext>,
}

impl ApiError {
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self {
            error,
            context: None,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::InvalidFormat(rejection.body_text()).into()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::InvalidFormat(rejection.body_text()).into()
    }
}

fn details_for(error: &ServiceError) -> Vec<ErrorDetail> {
    let code = error.code();
    match error {
        ServiceError::Validation(fields) => fields
            .iter()
            .map(|f| ErrorDetail {
                field: Some(f.field.clone()),
                message: f.message.clone(),
                value: f.value.clone(),
                code,
                action_type: None,
            })
            .collect(),
        ServiceError::State(e) => vec![ErrorDetail {
            field: Some("status".to_string()),
            message: e.reason.clone(),
            value: Some(e.current_status.to_string()),
            code,
            action_type: Some(e.action),
        }],
        ServiceError::NotFound { resource, id } => vec![ErrorDetail {
            field: Some(format!("{}_id", resource)),
            message: error.to_string(),
            value: Some(id.clone()),
            code,
            action_type: None,
        }],
        other => vec![ErrorDetail {
            field: None,
            message: other.to_string(),
            value: None,
            code,
            action_type: None,
        }],
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let errors = details_for(&self.error);
        let status = errors
            .iter()
            .map(|d| d.code.status())
            .max()
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.error.code().is_server_error() {
            tracing::error!("Request failed: {}", self.error);
        } else {
            tracing::warn!("Request rejected: {}", self.error);
        }

        let body = ErrorResponse {
            status: "error",
            message: self.error.to_string(),
            errors,
            details: self.context,
        };
        (status, Json(body)).into_response()
    }
}
