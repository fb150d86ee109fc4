//! In-memory store with one async mutex per record.
//!
//! The table maps are only held long enough to clone a row handle; all
//! record reads and writes go through the row's own lock, so operations on
//! different records never serialize against each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use tskmgr_core::{Run, RunId, Task, TaskId};

use super::{Gate, Mutation, Store, StoreError, StoreResult, TaskOrder, TaskQuery};

type Row<T> = Arc<Mutex<T>>;

/// Store backed by process memory.
pub struct MemoryStore {
    runs: RwLock<HashMap<RunId, Row<Run>>>,
    tasks: RwLock<HashMap<TaskId, Row<Task>>>,
    /// Task ids per run, in insertion order.
    run_tasks: RwLock<HashMap<RunId, Vec<TaskId>>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create an empty store whose row locks wait at most `lock_timeout`.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
            run_tasks: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    async fn run_row(&self, id: &RunId) -> Option<Row<Run>> {
        self.runs.read().await.get(id).cloned()
    }

    async fn task_row(&self, id: &TaskId) -> Option<Row<Task>> {
        self.tasks.read().await.get(id).cloned()
    }

    async fn lock<T>(&self, row: Row<T>, entity: &'static str, id: &str) -> StoreResult<OwnedMutexGuard<T>> {
        match tokio::time::timeout(self.lock_timeout, row.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                debug!(entity, id, "Row lock timed out");
                Err(StoreError::LockTimeout {
                    entity,
                    id: id.to_string(),
                })
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOCK_TIMEOUT)
    }
}

fn not_found(entity: &'static str, id: &str) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_run(&self, run: Run) -> StoreResult<()> {
        let id = run.id.clone();
        let mut runs = self.runs.write().await;
        if runs.contains_key(&id) {
            return Err(StoreError::Backend(format!("duplicate run id: {id}")));
        }
        runs.insert(id.clone(), Arc::new(Mutex::new(run)));
        drop(runs);

        self.run_tasks.write().await.entry(id).or_default();
        Ok(())
    }

    async fn insert_tasks(
        &self,
        run_id: &RunId,
        tasks: Vec<Task>,
        gate: Gate<Run>,
    ) -> StoreResult<()> {
        let row = self
            .run_row(run_id)
            .await
            .ok_or_else(|| not_found("run", run_id.as_str()))?;

        // Held until the batch is visible so close/abort cannot interleave.
        let run = self.lock(row, "run", run_id.as_str()).await?;
        gate(&*run)?;

        if let Some(stray) = tasks.iter().find(|t| t.run_id != *run_id) {
            return Err(StoreError::Backend(format!(
                "task {} belongs to run {}, not {}",
                stray.id, stray.run_id, run_id
            )));
        }

        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        {
            let mut rows = self.tasks.write().await;
            for task in tasks {
                rows.insert(task.id.clone(), Arc::new(Mutex::new(task)));
            }
        }
        self.run_tasks
            .write()
            .await
            .entry(run_id.clone())
            .or_default()
            .extend(ids);

        drop(run);
        Ok(())
    }

    async fn find_run(&self, id: &RunId) -> StoreResult<Option<Run>> {
        let Some(row) = self.run_row(id).await else {
            return Ok(None);
        };
        let run = self.lock(row, "run", id.as_str()).await?;
        Ok(Some(run.clone()))
    }

    async fn find_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let Some(row) = self.task_row(id).await else {
            return Ok(None);
        };
        let task = self.lock(row, "task", id.as_str()).await?;
        Ok(Some(task.clone()))
    }

    async fn query_tasks(&self, query: &TaskQuery) -> StoreResult<Vec<Task>> {
        let ids = self
            .run_tasks
            .read()
            .await
            .get(&query.run_id)
            .cloned()
            .unwrap_or_default();

        let rows: Vec<(TaskId, Row<Task>)> = {
            let tasks = self.tasks.read().await;
            ids.into_iter()
                .filter_map(|id| tasks.get(&id).cloned().map(|row| (id, row)))
                .collect()
        };

        let mut matched = Vec::new();
        for (id, row) in rows {
            let task = self.lock(row, "task", id.as_str()).await?;
            if query.matches(&task) {
                matched.push(task.clone());
            }
        }

        if query.order == TaskOrder::EndedDesc {
            matched.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn update_run(&self, id: &RunId, mutation: Mutation<Run>) -> StoreResult<Option<Run>> {
        let row = self
            .run_row(id)
            .await
            .ok_or_else(|| not_found("run", id.as_str()))?;
        let mut run = self.lock(row, "run", id.as_str()).await?;

        match mutation(&*run)? {
            Some(next) if next.id != run.id => Err(StoreError::Backend(format!(
                "mutation changed run id {} to {}",
                run.id, next.id
            ))),
            Some(next) => {
                *run = next.clone();
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }

    async fn update_task(
        &self,
        id: &TaskId,
        mutation: Mutation<Task>,
    ) -> StoreResult<Option<Task>> {
        let row = self
            .task_row(id)
            .await
            .ok_or_else(|| not_found("task", id.as_str()))?;
        let mut task = self.lock(row, "task", id.as_str()).await?;

        match mutation(&*task)? {
            Some(next) if next.id != task.id || next.run_id != task.run_id => {
                Err(StoreError::Backend(format!(
                    "mutation changed identity of task {}",
                    task.id
                )))
            }
            Some(next) => {
                *task = next.clone();
                Ok(Some(next))
            }
            None => Ok(None),
        }
    }
}
