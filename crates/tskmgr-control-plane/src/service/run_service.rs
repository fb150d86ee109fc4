//! Run operations: creation, task batches, close/abort/fail, reconcile.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use tskmgr_core::{run_lifecycle, CoreError, NewRun, NewTask, Run, RunId, Task};

use crate::aggregator::RunAggregator;
use crate::retry::with_retry;
use crate::service::{written, ServiceError, ServiceResult};
use crate::state::AppState;
use crate::store::{Mutation, TaskQuery};

/// A run together with its tasks, in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetails {
    #[serde(flatten)]
    pub run: Run,
    pub tasks: Vec<Task>,
}

/// Run operations.
pub struct RunService {
    state: Arc<AppState>,
}

impl RunService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn create_run(&self, spec: NewRun) -> ServiceResult<Run> {
        if spec.name.trim().is_empty() {
            return Err(CoreError::InvalidInput("run name must not be empty".to_string()).into());
        }

        let run = run_lifecycle::create(spec, Utc::now());
        let store = &self.state.store;
        with_retry(self.state.config.retry_policy(), "insert_run", || {
            store.insert_run(run.clone())
        })
        .await?;

        info!(run_id = %run.id, name = %run.name, run_type = %run.run_type, "Run created");
        Ok(run)
    }

    /// Add a batch of Pending tasks. The run must be neither terminal nor
    /// closed; that is checked under the run's lock.
    pub async fn create_tasks(&self, run_id: &RunId, specs: Vec<NewTask>) -> ServiceResult<Vec<Task>> {
        if let Some(i) = specs.iter().position(|s| s.name.trim().is_empty()) {
            return Err(CoreError::InvalidInput(format!("task #{i} has an empty name")).into());
        }

        let now = Utc::now();
        let tasks: Vec<Task> = specs
            .into_iter()
            .map(|spec| Task::create(run_id.clone(), spec, now))
            .collect();

        let store = &self.state.store;
        with_retry(self.state.config.retry_policy(), "insert_tasks", || {
            store.insert_tasks(run_id, tasks.clone(), Box::new(run_lifecycle::accepts_new_tasks))
        })
        .await?;

        info!(run_id = %run_id, count = tasks.len(), "Tasks created");
        Ok(tasks)
    }

    pub async fn get_run(&self, run_id: &RunId) -> ServiceResult<RunDetails> {
        let run = self.find(run_id).await?;
        let store = &self.state.store;
        let query = TaskQuery::for_run(run_id);
        let tasks =
            with_retry(self.state.config.retry_policy(), "query_tasks", || store.query_tasks(&query))
                .await?;
        Ok(RunDetails { run, tasks })
    }

    /// Stop accepting tasks. Closing a closed run returns it unchanged.
    /// Status is not recomputed here; see [`RunService::reconcile_run`].
    pub async fn close_run(&self, run_id: &RunId) -> ServiceResult<Run> {
        let closed = self
            .update(run_id, "close_run", || {
                Box::new(|run: &Run| Ok(run_lifecycle::close(run)))
            })
            .await?;

        match closed {
            Some(run) => {
                info!(run_id = %run_id, "Run closed");
                Ok(run)
            }
            None => self.find(run_id).await,
        }
    }

    pub async fn abort_run(&self, run_id: &RunId) -> ServiceResult<Run> {
        let run = self
            .update(run_id, "abort_run", || {
                Box::new(|run: &Run| run_lifecycle::abort(run, Utc::now()).map(Some))
            })
            .await?;
        let run = written(run, "abort")?;
        info!(run_id = %run_id, "Run aborted");
        Ok(run)
    }

    pub async fn fail_run(&self, run_id: &RunId) -> ServiceResult<Run> {
        let run = self
            .update(run_id, "fail_run", || {
                Box::new(|run: &Run| run_lifecycle::fail(run, Utc::now()).map(Some))
            })
            .await?;
        let run = written(run, "fail")?;
        info!(run_id = %run_id, "Run failed");
        Ok(run)
    }

    /// Explicit aggregation pass over the run's tasks.
    pub async fn reconcile_run(&self, run_id: &RunId) -> ServiceResult<Run> {
        RunAggregator::new(self.state.clone()).reconcile(run_id).await
    }

    async fn find(&self, run_id: &RunId) -> ServiceResult<Run> {
        let store = &self.state.store;
        with_retry(self.state.config.retry_policy(), "find_run", || store.find_run(run_id))
            .await?
            .ok_or_else(|| ServiceError::Core(CoreError::RunNotFound(run_id.clone())))
    }

    async fn update<F>(&self, run_id: &RunId, operation: &str, mutation: F) -> ServiceResult<Option<Run>>
    where
        F: Fn() -> Mutation<Run>,
    {
        let store = &self.state.store;
        let run = with_retry(self.state.config.retry_policy(), operation, || {
            store.update_run(run_id, mutation())
        })
        .await?;
        Ok(run)
    }
}
