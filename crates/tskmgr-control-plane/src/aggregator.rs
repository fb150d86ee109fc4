//! Drives run status recomputation after task outcomes.
//!
//! The task set is read before the run lock is taken; holding a run lock
//! while locking task rows would break the one-lock-per-caller rule. Every
//! caller reads after its own task write committed, so the last task to end
//! always sees the others' outcomes.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use tskmgr_core::{aggregate, CoreError, Run, RunId, Task};

use crate::retry::with_retry;
use crate::service::{ServiceError, ServiceResult};
use crate::state::AppState;
use crate::store::TaskQuery;

/// Run aggregator.
pub struct RunAggregator {
    state: Arc<AppState>,
}

impl RunAggregator {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Recompute the owning run after `task` reached a terminal status.
    pub async fn on_task_ended(&self, task: &Task) -> ServiceResult<Run> {
        self.recompute(&task.run_id, Some(task)).await
    }

    /// Explicit pass with no triggering task. Completes a run that was closed
    /// after its last task finished.
    pub async fn reconcile(&self, run_id: &RunId) -> ServiceResult<Run> {
        self.recompute(run_id, None).await
    }

    async fn recompute(&self, run_id: &RunId, ended: Option<&Task>) -> ServiceResult<Run> {
        let store = &self.state.store;
        let policy = self.state.config.retry_policy();

        let query = TaskQuery::for_run(run_id);
        let tasks = with_retry(policy, "query_tasks", || store.query_tasks(&query)).await?;

        let updated = with_retry(policy, "aggregate_run", || {
            let tasks = tasks.clone();
            let ended = ended.cloned();
            store.update_run(
                run_id,
                Box::new(move |run: &Run| aggregate::recompute(run, ended.as_ref(), &tasks, Utc::now())),
            )
        })
        .await?;

        match updated {
            Some(run) => {
                info!(run_id = %run.id, status = %run.status, "Run status aggregated");
                Ok(run)
            }
            None => self.current(run_id).await,
        }
    }

    async fn current(&self, run_id: &RunId) -> ServiceResult<Run> {
        let store = &self.state.store;
        with_retry(self.state.config.retry_policy(), "find_run", || store.find_run(run_id))
            .await?
            .ok_or_else(|| ServiceError::Core(CoreError::RunNotFound(run_id.clone())))
    }
}
