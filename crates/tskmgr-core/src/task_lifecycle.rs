//! Task state machine: Pending -> Running -> {Completed, Failed}.

use chrono::{DateTime, Utc};

use crate::{CoreError, RunnerId, RunnerInfo, Task, TaskStatus};

/// Claim a task for a runner.
pub fn start(
    task: &Task,
    runner_id: &RunnerId,
    runner_info: RunnerInfo,
    now: DateTime<Utc>,
) -> Result<Task, CoreError> {
    if task.has_started() {
        return Err(CoreError::invalid_transition(
            "Can't start already started task.",
        ));
    }
    Ok(Task {
        status: TaskStatus::Running,
        runner_id: Some(runner_id.clone()),
        runner_info: Some(runner_info),
        started_at: Some(now),
        ..task.clone()
    })
}

pub fn complete(task: &Task, cached: bool, now: DateTime<Utc>) -> Result<Task, CoreError> {
    let mut done = finish(task, TaskStatus::Completed, now)?;
    done.cached = Some(cached);
    Ok(done)
}

pub fn fail(task: &Task, now: DateTime<Utc>) -> Result<Task, CoreError> {
    finish(task, TaskStatus::Failed, now)
}

fn finish(task: &Task, status: TaskStatus, now: DateTime<Utc>) -> Result<Task, CoreError> {
    let started_at = match task.started_at {
        Some(started_at) if !task.has_ended() => started_at,
        _ => {
            return Err(CoreError::invalid_transition(format!(
                "Task with {} status can't change to {}",
                task.status, status
            )))
        }
    };

    // Records come from different hosts; never end before the start.
    let ended_at = now.max(started_at);

    Ok(Task {
        status,
        ended_at: Some(ended_at),
        duration: Some(duration_secs(started_at, ended_at)),
        ..task.clone()
    })
}

/// Seconds between two instants, with microsecond resolution.
pub fn duration_secs(started_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> f64 {
    let elapsed = ended_at.signed_duration_since(started_at);
    match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 1_000_000.0,
        None => elapsed.num_milliseconds() as f64 / 1_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewTask, RunId};
    use chrono::Duration;

    fn pending() -> Task {
        Task::create(
            RunId::new("run-1"),
            NewTask::new("build", "compile", "make"),
            Utc::now(),
        )
    }

    fn info() -> RunnerInfo {
        RunnerInfo::from([("host".to_string(), "ci-01".to_string())])
    }

    #[test]
    fn test_start() {
        let now = Utc::now();
        let runner = RunnerId::new("runner-1");
        let task = start(&pending(), &runner, info(), now).unwrap();

        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.runner_id, Some(runner));
        assert_eq!(task.started_at, Some(now));
        assert_eq!(
            task.runner_info.unwrap().get("host").map(String::as_str),
            Some("ci-01")
        );
    }

    #[test]
    fn test_start_twice() {
        let runner = RunnerId::new("runner-1");
        let task = start(&pending(), &runner, info(), Utc::now()).unwrap();
        let err = start(&task, &runner, info(), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Can't start already started task.");
    }

    #[test]
    fn test_complete_sets_duration() {
        let t0 = Utc::now();
        let task = start(&pending(), &RunnerId::new("r"), info(), t0).unwrap();
        let done = complete(&task, true, t0 + Duration::milliseconds(1500)).unwrap();

        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.cached, Some(true));
        assert_eq!(done.duration, Some(1.5));
        assert_eq!(done.ended_at, Some(t0 + Duration::milliseconds(1500)));
    }

    #[test]
    fn test_fail_sets_duration_without_cached() {
        let t0 = Utc::now();
        let task = start(&pending(), &RunnerId::new("r"), info(), t0).unwrap();
        let failed = fail(&task, t0 + Duration::seconds(2)).unwrap();

        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.duration, Some(2.0));
        assert!(failed.cached.is_none());
    }

    #[test]
    fn test_complete_requires_start() {
        let err = complete(&pending(), false, Utc::now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Task with PENDING status can't change to COMPLETED"
        );

        let err = fail(&pending(), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Task with PENDING status can't change to FAILED");
    }

    #[test]
    fn test_terminal_is_immutable() {
        let t0 = Utc::now();
        let task = start(&pending(), &RunnerId::new("r"), info(), t0).unwrap();
        let done = complete(&task, false, t0 + Duration::seconds(1)).unwrap();

        assert_eq!(
            fail(&done, t0).unwrap_err().to_string(),
            "Task with COMPLETED status can't change to FAILED"
        );
        assert!(complete(&done, true, t0).is_err());
        assert!(start(&done, &RunnerId::new("r"), info(), t0).is_err());
    }

    #[test]
    fn test_clock_skew_never_negative() {
        let t0 = Utc::now();
        let task = start(&pending(), &RunnerId::new("r"), info(), t0).unwrap();
        let done = complete(&task, false, t0 - Duration::seconds(3)).unwrap();

        assert_eq!(done.ended_at, Some(t0));
        assert_eq!(done.duration, Some(0.0));
    }
}
