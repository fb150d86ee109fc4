//! Run state machine.
//!
//! ```text
//! Created --first task starts--> Started --task fails----------------> Failed
//!                                        --closed, all done, no fail--> Completed
//! Created | Started --abort--> Aborted
//! Created | Started --fail---> Failed
//! ```
//!
//! Functions returning `Option<Run>` yield `None` when the call is a no-op, so
//! the store can skip the write.

use chrono::{DateTime, Utc};

use crate::{CoreError, NewRun, Run, RunId, RunStatus, RunnerId};

/// Build a fresh run from a request.
pub fn create(spec: NewRun, now: DateTime<Utc>) -> Run {
    Run {
        id: RunId::generate(),
        name: spec.name,
        run_type: spec.run_type,
        url: spec.url,
        parameters: spec.parameters,
        prioritization: spec.prioritization,
        affinity: spec.affinity,
        fail_fast: spec.fail_fast,
        status: RunStatus::Created,
        leader_id: None,
        closed: false,
        created_at: now,
        ended_at: None,
    }
}

/// Gate for task batch creation. Status is checked before the closed flag.
pub fn accepts_new_tasks(run: &Run) -> Result<(), CoreError> {
    if run.status.is_terminal() {
        return Err(CoreError::invalid_transition(format!(
            "Run with {} status can't accept new tasks",
            run.status
        )));
    }
    if run.closed {
        return Err(CoreError::ClosedRun);
    }
    Ok(())
}

/// Created -> Started. No-op once the run has moved on.
pub fn mark_started(run: &Run) -> Option<Run> {
    if run.status != RunStatus::Created {
        return None;
    }
    Some(Run {
        status: RunStatus::Started,
        ..run.clone()
    })
}

/// Set the closed flag. Closing twice is a no-op.
pub fn close(run: &Run) -> Option<Run> {
    if run.closed {
        return None;
    }
    Some(Run {
        closed: true,
        ..run.clone()
    })
}

pub fn abort(run: &Run, now: DateTime<Utc>) -> Result<Run, CoreError> {
    end(run, RunStatus::Aborted, "abort", now)
}

pub fn fail(run: &Run, now: DateTime<Utc>) -> Result<Run, CoreError> {
    end(run, RunStatus::Failed, "fail", now)
}

/// Only the aggregator completes runs.
pub fn complete(run: &Run, now: DateTime<Utc>) -> Result<Run, CoreError> {
    end(run, RunStatus::Completed, "complete", now)
}

fn end(run: &Run, status: RunStatus, verb: &str, now: DateTime<Utc>) -> Result<Run, CoreError> {
    if run.has_ended() {
        return Err(CoreError::invalid_transition(format!(
            "Can't {verb} already ended run."
        )));
    }
    Ok(Run {
        status,
        ended_at: Some(now),
        ..run.clone()
    })
}

/// Leader claim: first runner wins, the winner may re-confirm forever.
///
/// Returns the run to write (unchanged when re-confirming) or `None` when
/// another runner already leads.
pub fn set_leader(run: &Run, runner_id: &RunnerId) -> Option<Run> {
    match &run.leader_id {
        None => Some(Run {
            leader_id: Some(runner_id.clone()),
            ..run.clone()
        }),
        Some(_) if run.is_led_by(runner_id) => Some(run.clone()),
        Some(_) => None,
    }
}
