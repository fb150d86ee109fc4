//! Run and task operations exposed by the control plane.
//!
//! Services are cheap handles over [`AppState`](crate::state::AppState);
//! construct one per request.

use thiserror::Error;

use tskmgr_core::{CoreError, RunId, TaskId};

use crate::store::StoreError;

pub mod leader;
pub mod run_service;
pub mod task_service;

pub use leader::{LeaderElection, SetLeaderResponse};
pub use run_service::{RunDetails, RunService};
pub use task_service::{TaskService, TaskWithRun};

/// Service errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Business rule violation or missing record.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Lock contention outlasted every retry.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => Self::Core(e),
            StoreError::NotFound { entity: "task", id } => {
                Self::Core(CoreError::TaskNotFound(TaskId::new(id)))
            }
            StoreError::NotFound { id, .. } => Self::Core(CoreError::RunNotFound(RunId::new(id))),
            e @ StoreError::LockTimeout { .. } => Self::Unavailable(e.to_string()),
            StoreError::Backend(msg) => Self::Store(msg),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Unwrap the record written by a mutation that always writes.
pub(crate) fn written<T>(record: Option<T>, what: &str) -> ServiceResult<T> {
    record.ok_or_else(|| ServiceError::Store(format!("{what} update was not written")))
}
