//! Status enums for Runs and Tasks, and the task priority classes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run created, no task started yet.
    #[default]
    Created,
    /// At least one task has started.
    Started,
    /// Closed, every task terminal and none failed.
    Completed,
    /// A task failed or the run was failed explicitly.
    Failed,
    /// Aborted by a client.
    Aborted,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Returns true if the run is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Wire spelling, also used in error reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, waiting for a runner.
    #[default]
    Pending,
    /// Claimed by a runner.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a failure.
    Failed,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire spelling, also used in error reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering class of a task, based on its expected duration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    /// Longest expected duration first.
    #[default]
    Longest,
    /// Shortest expected duration first.
    Shortest,
}

impl TaskPriority {
    /// Position used when a run's prioritization does not list this class.
    pub(crate) fn fallback_rank(&self) -> usize {
        match self {
            Self::Longest => 0,
            Self::Shortest => 1,
        }
    }
}
