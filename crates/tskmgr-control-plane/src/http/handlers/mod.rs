//! HTTP request handlers.

mod health;
mod runs;
mod tasks;

pub use health::health_check;
pub use runs::{
    abort_run, close_run, create_run, create_tasks, fail_run, get_run, reconcile_run, set_leader,
    start_task,
};
pub use tasks::{complete_task, fail_task};
