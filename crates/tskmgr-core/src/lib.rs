//! tskmgr Core Domain Types
//!
//! This crate contains pure domain types and state machines with no
//! dependencies on:
//! - Network/HTTP
//! - Storage
//! - Runtime specifics
//!
//! Every transition takes a record by reference and returns either an updated
//! record or a [`CoreError`]; persisting the result is the caller's job.

pub mod aggregate;
pub mod error;
pub mod ids;
pub mod ordering;
pub mod run;
pub mod run_lifecycle;
pub mod status;
pub mod task;
pub mod task_lifecycle;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{RunId, RunnerId, TaskId};
pub use run::{NewRun, Run};
pub use status::{RunStatus, TaskPriority, TaskStatus};
pub use task::{NewTask, RunnerInfo, Task};
