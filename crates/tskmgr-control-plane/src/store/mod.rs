//! Durable record store consumed by the control plane.
//!
//! The core only needs four things from storage: insert, read, ordered query,
//! and an atomic conditional update of a single record under that record's
//! lock. `update_run`/`update_task` are the conditional update: the store
//! locks the row, hands the current value to a synchronous mutation, writes
//! the result if there is one, and releases the row. A SQL backend maps this
//! to `SELECT ... FOR UPDATE` + `UPDATE` inside one transaction.

use async_trait::async_trait;
use thiserror::Error;

use tskmgr_core::{CoreError, Run, RunId, RunnerId, Task, TaskId, TaskStatus};

pub mod memory;

pub use memory::MemoryStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A mutation or gate refused the current record.
    #[error(transparent)]
    Rejected(#[from] CoreError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Row lock not acquired in time. Transient.
    #[error("timed out waiting for {entity} lock: {id}")]
    LockTimeout { entity: &'static str, id: String },

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true for errors worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Conditional update applied under a row lock.
///
/// `Ok(Some(record))` writes, `Ok(None)` leaves the row untouched and
/// `Err` aborts with [`StoreError::Rejected`].
pub type Mutation<T> = Box<dyn FnOnce(&T) -> Result<Option<T>, CoreError> + Send>;

/// Precondition checked under a row lock before a dependent write.
pub type Gate<T> = Box<dyn FnOnce(&T) -> Result<(), CoreError> + Send>;

/// Sort order for task queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskOrder {
    /// Insertion order.
    #[default]
    Created,
    /// Most recently ended first; unfinished tasks last.
    EndedDesc,
}

/// Filter, order and limit for [`Store::query_tasks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQuery {
    pub run_id: RunId,
    pub status: Option<TaskStatus>,
    pub runner_id: Option<RunnerId>,
    pub order: TaskOrder,
    pub limit: Option<usize>,
}

impl TaskQuery {
    /// All tasks of a run, in insertion order.
    pub fn for_run(run_id: &RunId) -> Self {
        Self {
            run_id: run_id.clone(),
            status: None,
            runner_id: None,
            order: TaskOrder::Created,
            limit: None,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_runner(mut self, runner_id: &RunnerId) -> Self {
        self.runner_id = Some(runner_id.clone());
        self
    }

    pub fn ordered_by(mut self, order: TaskOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `task` passes the filter.
    pub fn matches(&self, task: &Task) -> bool {
        task.run_id == self.run_id
            && self.status.map_or(true, |s| task.status == s)
            && self
                .runner_id
                .as_ref()
                .map_or(true, |r| task.runner_id.as_ref() == Some(r))
    }
}

/// Run and task persistence with row-scoped locking.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_run(&self, run: Run) -> StoreResult<()>;

    /// Insert a task batch while holding the owning run's lock, after `gate`
    /// accepted the run.
    async fn insert_tasks(&self, run_id: &RunId, tasks: Vec<Task>, gate: Gate<Run>)
        -> StoreResult<()>;

    async fn find_run(&self, id: &RunId) -> StoreResult<Option<Run>>;

    async fn find_task(&self, id: &TaskId) -> StoreResult<Option<Task>>;

    async fn query_tasks(&self, query: &TaskQuery) -> StoreResult<Vec<Task>>;

    /// Atomic conditional update of one run. Returns the written record, or
    /// `None` when the mutation chose not to write.
    async fn update_run(&self, id: &RunId, mutation: Mutation<Run>) -> StoreResult<Option<Run>>;

    /// Atomic conditional update of one task.
    async fn update_task(&self, id: &TaskId, mutation: Mutation<Task>)
        -> StoreResult<Option<Task>>;
}
