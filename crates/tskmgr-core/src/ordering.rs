//! Order in which Pending tasks are handed to runners.
//!
//! Keys, most significant first:
//! 1. priority class, by position in the run's `prioritization`
//!    (unlisted classes go last); `Shortest` then sorts by ascending
//!    `avg_duration`, `Longest` by descending, unknown durations last
//! 2. affinity with the runner's last completed task, if the run asks for it
//! 3. creation time, oldest first
//!
//! The sort is stable, so tasks equal on every key keep the order they were
//! read in.

use std::cmp::Ordering;

use crate::{Run, Task, TaskPriority};

/// Rank `pending` for a runner whose most recent completed task in this run
/// was `last_completed`.
pub fn rank_pending(run: &Run, mut pending: Vec<Task>, last_completed: Option<&Task>) -> Vec<Task> {
    let hint = if run.affinity { last_completed } else { None };
    pending.sort_by(|a, b| compare(run, hint, a, b));
    pending
}

fn compare(run: &Run, hint: Option<&Task>, a: &Task, b: &Task) -> Ordering {
    class_rank(run, a.priority)
        .cmp(&class_rank(run, b.priority))
        .then_with(|| compare_duration(a, b))
        .then_with(|| affinity_rank(hint, a).cmp(&affinity_rank(hint, b)))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

fn class_rank(run: &Run, priority: TaskPriority) -> usize {
    run.prioritization
        .iter()
        .position(|p| *p == priority)
        .unwrap_or(run.prioritization.len() + priority.fallback_rank())
}

// Both tasks share a class here, so `a.priority` decides the direction.
fn compare_duration(a: &Task, b: &Task) -> Ordering {
    match (a.avg_duration, b.avg_duration) {
        (Some(x), Some(y)) => match a.priority {
            TaskPriority::Shortest => x.total_cmp(&y),
            TaskPriority::Longest => y.total_cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn affinity_rank(hint: Option<&Task>, task: &Task) -> u8 {
    match hint {
        Some(last) if last.task_type == task.task_type && last.command == task.command => 0,
        Some(last) if last.task_type == task.task_type => 1,
        Some(_) => 2,
        None => 0,
    }
}
