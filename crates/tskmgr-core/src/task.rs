//! Task record and the request that creates one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{RunId, RunnerId, TaskId, TaskPriority, TaskStatus};

/// Free-form key/value facts a runner reports about itself (host, os, ...).
pub type RunnerInfo = HashMap<String, String>;

/// Caller-supplied fields of a new Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub name: String,

    #[serde(rename = "type")]
    pub task_type: String,

    /// Command the runner executes.
    pub command: String,

    #[serde(default)]
    pub arguments: Vec<String>,

    /// Opaque options passed through to the runner.
    #[serde(default)]
    pub options: Option<serde_json::Value>,

    #[serde(default)]
    pub priority: TaskPriority,

    /// Historical average duration in seconds, if known.
    #[serde(default)]
    pub avg_duration: Option<f64>,
}

impl NewTask {
    /// Create a new task request with the required fields.
    pub fn new(
        name: impl Into<String>,
        task_type: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            command: command.into(),
            arguments: Vec::new(),
            options: None,
            priority: TaskPriority::default(),
            avg_duration: None,
        }
    }

    /// Builder method to add an argument.
    pub fn with_argument(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Builder method to set the options blob.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Builder method to set the priority class.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the duration hint.
    pub fn with_avg_duration(mut self, secs: f64) -> Self {
        self.avg_duration = Some(secs);
        self
    }
}

/// One unit of work belonging to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Owning run.
    pub run_id: RunId,

    pub name: String,

    #[serde(rename = "type")]
    pub task_type: String,

    pub command: String,

    pub arguments: Vec<String>,

    pub options: Option<serde_json::Value>,

    /// Current task status.
    pub status: TaskStatus,

    /// Runner that claimed the task.
    pub runner_id: Option<RunnerId>,

    pub runner_info: Option<RunnerInfo>,

    /// Whether the runner reused a cached result. Set on completion.
    pub cached: Option<bool>,

    /// Seconds between `started_at` and `ended_at`.
    pub duration: Option<f64>,

    pub avg_duration: Option<f64>,

    pub priority: TaskPriority,

    pub created_at: DateTime<Utc>,

    pub started_at: Option<DateTime<Utc>>,

    pub ended_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build a Pending task for `run_id` from a request.
    pub fn create(run_id: RunId, spec: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate(),
            run_id,
            name: spec.name,
            task_type: spec.task_type,
            command: spec.command,
            arguments: spec.arguments,
            options: spec.options,
            status: TaskStatus::Pending,
            runner_id: None,
            runner_info: None,
            cached: None,
            duration: None,
            avg_duration: spec.avg_duration,
            priority: spec.priority,
            created_at: now,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn has_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
