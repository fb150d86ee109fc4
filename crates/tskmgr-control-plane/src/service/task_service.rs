//! Task outcome reporting.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use tskmgr_core::{task_lifecycle, Run, Task, TaskId};

use crate::aggregator::RunAggregator;
use crate::retry::with_retry;
use crate::service::{written, ServiceResult};
use crate::state::AppState;
use crate::store::Mutation;

/// A task with the state of its run after aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWithRun {
    #[serde(flatten)]
    pub task: Task,
    pub run: Run,
}

/// Task operations.
pub struct TaskService {
    state: Arc<AppState>,
}

impl TaskService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn complete_task(&self, task_id: &TaskId, cached: bool) -> ServiceResult<TaskWithRun> {
        self.finish(task_id, "complete_task", || {
            Box::new(move |task: &Task| task_lifecycle::complete(task, cached, Utc::now()).map(Some))
        })
        .await
    }

    pub async fn fail_task(&self, task_id: &TaskId) -> ServiceResult<TaskWithRun> {
        self.finish(task_id, "fail_task", || {
            Box::new(|task: &Task| task_lifecycle::fail(task, Utc::now()).map(Some))
        })
        .await
    }

    async fn finish<F>(&self, task_id: &TaskId, operation: &str, mutation: F) -> ServiceResult<TaskWithRun>
    where
        F: Fn() -> Mutation<Task>,
    {
        let store = &self.state.store;
        let task = with_retry(self.state.config.retry_policy(), operation, || {
            store.update_task(task_id, mutation())
        })
        .await?;
        let task = written(task, operation)?;

        info!(
            task_id = %task.id,
            run_id = %task.run_id,
            status = %task.status,
            duration = task.duration.unwrap_or_default(),
            "Task ended"
        );

        let run = RunAggregator::new(self.state.clone())
            .on_task_ended(&task)
            .await?;
        Ok(TaskWithRun { task, run })
    }
}
