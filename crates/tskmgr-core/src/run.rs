//! Run record and the request that creates one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{RunId, RunStatus, RunnerId, TaskPriority};

/// Caller-supplied fields of a new Run. Immutable once the run exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRun {
    /// Human-readable run name.
    pub name: String,

    /// Free-form run type (e.g. a CI job kind).
    #[serde(rename = "type")]
    pub run_type: String,

    /// Link back to whatever triggered the run.
    #[serde(default)]
    pub url: Option<String>,

    /// Free-form parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// Order in which task priority classes are served.
    #[serde(default)]
    pub prioritization: Vec<TaskPriority>,

    /// Prefer tasks similar to the one a runner completed last.
    #[serde(default)]
    pub affinity: bool,

    /// Stop handing out tasks once any task failed.
    #[serde(default)]
    pub fail_fast: bool,
}

impl NewRun {
    /// Create a new run request with the required fields.
    pub fn new(name: impl Into<String>, run_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            run_type: run_type.into(),
            url: None,
            parameters: HashMap::new(),
            prioritization: Vec::new(),
            affinity: false,
            fail_fast: false,
        }
    }

    /// Builder method to set the source url.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Builder method to add a parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Builder method to set the prioritization policy.
    pub fn with_prioritization(mut self, prioritization: Vec<TaskPriority>) -> Self {
        self.prioritization = prioritization;
        self
    }

    /// Builder method to enable runner affinity.
    pub fn with_affinity(mut self, affinity: bool) -> Self {
        self.affinity = affinity;
        self
    }

    /// Builder method to set the fail-fast flag.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// A named batch of tasks sharing one lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Unique run identifier.
    pub id: RunId,

    pub name: String,

    #[serde(rename = "type")]
    pub run_type: String,

    pub url: Option<String>,

    pub parameters: HashMap<String, String>,

    pub prioritization: Vec<TaskPriority>,

    pub affinity: bool,

    pub fail_fast: bool,

    /// Current run status.
    pub status: RunStatus,

    /// Runner elected as leader, set at most once.
    pub leader_id: Option<RunnerId>,

    /// When true the run accepts no new tasks.
    pub closed: bool,

    /// When the run was created.
    pub created_at: DateTime<Utc>,

    /// When the run reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Returns true once a terminal transition stamped `ended_at`.
    pub fn has_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Returns true if `runner_id` is the elected leader.
    pub fn is_led_by(&self, runner_id: &RunnerId) -> bool {
        self.leader_id.as_ref() == Some(runner_id)
    }
}
