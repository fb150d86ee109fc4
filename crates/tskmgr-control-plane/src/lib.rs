//! tskmgr Control Plane Library
//!
//! This crate coordinates runs and their tasks across polling runners:
//! record storage with row-scoped locks, leader election, pending task
//! assignment, run aggregation and the HTTP binding.

pub mod aggregator;
pub mod config;
pub mod http;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;

pub use aggregator::RunAggregator;
pub use config::{AssignmentPolicy, Config};
pub use scheduler::{PendingTaskAssigner, StartTaskResponse};
pub use service::{LeaderElection, RunService, ServiceError, TaskService};
pub use state::AppState;
pub use store::{MemoryStore, Store, StoreError};
