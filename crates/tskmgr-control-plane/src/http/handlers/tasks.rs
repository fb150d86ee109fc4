//! Task outcome handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use tskmgr_core::TaskId;

use crate::http::responses::{ApiError, CompleteTaskRequest};
use crate::service::{TaskService, TaskWithRun};
use crate::state::AppState;

/// Mark a running task completed. The body is optional; `cached` defaults
/// to false.
pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    body: Option<Json<CompleteTaskRequest>>,
) -> Result<Json<TaskWithRun>, ApiError> {
    let cached = body.map_or(false, |Json(req)| req.cached);
    let res = TaskService::new(state).complete_task(&id, cached).await?;
    Ok(Json(res))
}

pub async fn fail_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
) -> Result<Json<TaskWithRun>, ApiError> {
    Ok(Json(TaskService::new(state).fail_task(&id).await?))
}
