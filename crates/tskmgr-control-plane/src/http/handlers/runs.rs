//! Run handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use tskmgr_core::{NewRun, NewTask, Run, RunId, Task};

use crate::http::responses::{ApiError, SetLeaderRequest, StartTaskRequest};
use crate::scheduler::{PendingTaskAssigner, StartTaskResponse};
use crate::service::{LeaderElection, RunDetails, RunService, SetLeaderResponse};
use crate::state::AppState;

pub async fn create_run(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<NewRun>,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    let run = RunService::new(state).create_run(spec).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Json<RunDetails>, ApiError> {
    Ok(Json(RunService::new(state).get_run(&id).await?))
}

pub async fn create_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
    Json(specs): Json<Vec<NewTask>>,
) -> Result<(StatusCode, Json<Vec<Task>>), ApiError> {
    let tasks = RunService::new(state).create_tasks(&id, specs).await?;
    Ok((StatusCode::CREATED, Json(tasks)))
}

/// Poll for the next Pending task.
pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
    Json(req): Json<StartTaskRequest>,
) -> Result<Json<StartTaskResponse>, ApiError> {
    let res = PendingTaskAssigner::new(state)
        .find_pending_task(&id, &req.runner_id, req.runner_info)
        .await?;
    Ok(Json(res))
}

pub async fn close_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(RunService::new(state).close_run(&id).await?))
}

pub async fn abort_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(RunService::new(state).abort_run(&id).await?))
}

pub async fn fail_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(RunService::new(state).fail_run(&id).await?))
}

pub async fn reconcile_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(RunService::new(state).reconcile_run(&id).await?))
}

pub async fn set_leader(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RunId>,
    Json(req): Json<SetLeaderRequest>,
) -> Result<Json<SetLeaderResponse>, ApiError> {
    let res = LeaderElection::new(state)
        .set_leader(&id, &req.runner_id)
        .await?;
    Ok(Json(res))
}
