//! Core domain errors.

use thiserror::Error;

use crate::{RunId, TaskId};

/// Core domain errors for tskmgr.
///
/// Display output is the reason surfaced to callers, so the wording of
/// `InvalidTransition` and `ClosedRun` is part of the API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Operation attempted on a record in an incompatible state.
    #[error("{0}")]
    InvalidTransition(String),

    /// Task creation attempted on a closed run.
    #[error("Closed run can't accept new tasks")]
    ClosedRun,

    /// Run not found.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Task not found.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Build an `InvalidTransition` from a reason.
    pub fn invalid_transition(reason: impl Into<String>) -> Self {
        Self::InvalidTransition(reason.into())
    }

    /// Returns true for the not-found variants.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RunNotFound(_) | Self::TaskNotFound(_))
    }
}
