//! Run status as a function of its task set.

use chrono::{DateTime, Utc};

use crate::{run_lifecycle, CoreError, Run, Task, TaskStatus};

/// Recompute `run` after `ended` reached a terminal state, or on an explicit
/// pass when `ended` is `None`.
///
/// `tasks` is the run's task set as last read; `ended` takes precedence over
/// its own (possibly stale) entry. Any Failed task fails the run. Returns
/// `None` when the run is unchanged.
/// Runs that already ended are left alone, so a second task failure does not
/// error.
pub fn recompute(
    run: &Run,
    ended: Option<&Task>,
    tasks: &[Task],
    now: DateTime<Utc>,
) -> Result<Option<Run>, CoreError> {
    if run.has_ended() {
        return Ok(None);
    }

    let status_of = |task: &Task| match ended {
        Some(e) if e.id == task.id => e.status,
        _ => task.status,
    };

    // The whole set is checked even with a trigger, so a failure whose own
    // aggregation never committed is still picked up by a later pass.
    let any_failed = ended.is_some_and(|t| t.status == TaskStatus::Failed)
        || tasks.iter().any(|t| status_of(t) == TaskStatus::Failed);
    if any_failed {
        return run_lifecycle::fail(run, now).map(Some);
    }

    let all_done = tasks
        .iter()
        .all(|t| status_of(t) == TaskStatus::Completed);
    if run.closed && all_done {
        return run_lifecycle::complete(run, now).map(Some);
    }

    Ok(None)
}
