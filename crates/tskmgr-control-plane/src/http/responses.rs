//! HTTP request and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use tskmgr_core::{CoreError, RunnerId, RunnerInfo};

use crate::service::ServiceError;

// ============================================================================
// Request bodies
// ============================================================================

/// Body of `PUT /api/runs/:id/tasks/start`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskRequest {
    pub runner_id: RunnerId,
    #[serde(default)]
    pub runner_info: RunnerInfo,
}

/// Body of `PUT /api/tasks/:id/complete`.
#[derive(Debug, Deserialize)]
pub struct CompleteTaskRequest {
    #[serde(default)]
    pub cached: bool,
}

/// Body of `PUT /api/runs/:id/leader`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLeaderRequest {
    pub runner_id: RunnerId,
}

// ============================================================================
// Error types
// ============================================================================

/// Error response. `reason` repeats `error` for runner clients that read
/// that key.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub reason: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        let error = message.into();
        Self {
            reason: error.clone(),
            error,
        }
    }
}

/// Service error rendered as JSON with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Core(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            ServiceError::Core(CoreError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            // InvalidTransition, ClosedRun
            ServiceError::Core(_) => StatusCode::CONFLICT,
            ServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        let body = ErrorResponse::new(self.0.to_string());
        (status, Json(body)).into_response()
    }
}
