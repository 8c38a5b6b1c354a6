//! Application error type mapping to HTTP status codes and the envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use actionflow_core::channel::ChannelError;
use actionflow_core::orchestrator::{DispatchReport, OrchestratorError};
use actionflow_types::error::{CatalogError, EntityError};

use crate::http::response::{ApiErrorDetail, ApiResponse};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Workflow or entity does not resolve.
    NotFound(String),
    /// Malformed request body or entity reference.
    BadRequest(String),
    /// A collaborator (catalog, entity service, stream) is unreachable.
    Unavailable(String),
    /// Some steps were not published. Carries the full report.
    StepsFailed(Box<DispatchReport>),
    Internal(String),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::NotFound(msg) => AppError::NotFound(msg),
            OrchestratorError::Catalog(CatalogError::Invalid(msg)) => {
                AppError::Internal(format!("invalid catalog data: {msg}"))
            }
            OrchestratorError::Catalog(other) => AppError::Unavailable(other.to_string()),
            OrchestratorError::Entity(EntityError::InvalidReference(msg)) => {
                AppError::BadRequest(msg)
            }
            OrchestratorError::Entity(other) => AppError::Unavailable(other.to_string()),
            OrchestratorError::StepsFailed(report) => AppError::StepsFailed(report),
        }
    }
}

impl From<ChannelError> for AppError {
    fn from(e: ChannelError) -> Self {
        if e.is_retryable() {
            AppError::Unavailable(e.to_string())
        } else {
            AppError::Internal(e.to_string())
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String, Option<serde_json::Value>) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None)
            }
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DEPENDENCY_UNAVAILABLE",
                msg.clone(),
                None,
            ),
            AppError::StepsFailed(report) => {
                // Retrying the whole trigger republishes steps that already
                // succeeded; the report lets the caller see which ones.
                let (status, code) = if report.has_retryable_failure() {
                    (StatusCode::SERVICE_UNAVAILABLE, "STEPS_FAILED_RETRYABLE")
                } else {
                    (StatusCode::UNPROCESSABLE_ENTITY, "STEPS_FAILED")
                };
                let details = json!({
                    "trigger_id": report.trigger_id,
                    "workflow_id": report.workflow_id,
                    "failed_step_indices": report.failed_step_indices(),
                    "failures": report.failures,
                    "published": report.published,
                });
                let message = OrchestratorError::StepsFailed(report.clone()).to_string();
                (status, code, message, Some(details))
            }
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
                None,
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();
        if status.is_server_error() {
            tracing::warn!(code, %message, "request failed");
        }

        let envelope = ApiResponse::error(
            ApiErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
            String::new(),
            0,
        );
        let body = serde_json::to_string(&envelope).unwrap_or_else(|_| {
            r#"{"errors":[{"code":"SERIALIZATION_ERROR","message":"Failed to serialize response"}]}"#.to_string()
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
