//! Leader election for a run.
//!
//! The first runner to claim a run becomes its leader for good. The leader
//! may call again at any time to re-confirm; everybody else is told no.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tskmgr_core::{run_lifecycle, CoreError, Run, RunId, RunnerId};

use crate::retry::with_retry;
use crate::service::ServiceResult;
use crate::state::AppState;

/// Outcome of a leadership claim. `run` is only returned to the leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLeaderResponse {
    pub leader: bool,
    pub run: Option<Run>,
}

/// Leader election.
pub struct LeaderElection {
    state: Arc<AppState>,
}

impl LeaderElection {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Claim leadership of `run_id` for `runner_id`.
    ///
    /// The leader check and the write happen in one conditional update under
    /// the run's lock.
    pub async fn set_leader(
        &self,
        run_id: &RunId,
        runner_id: &RunnerId,
    ) -> ServiceResult<SetLeaderResponse> {
        if runner_id.is_blank() {
            return Err(CoreError::InvalidInput("runnerId must not be empty".to_string()).into());
        }

        let store = &self.state.store;
        let claimed = with_retry(self.state.config.retry_policy(), "set_leader", || {
            let runner = runner_id.clone();
            store.update_run(
                run_id,
                Box::new(move |run: &Run| Ok(run_lifecycle::set_leader(run, &runner))),
            )
        })
        .await?;

        match claimed {
            Some(run) => {
                info!(run_id = %run_id, runner_id = %runner_id, "Runner is leader");
                Ok(SetLeaderResponse {
                    leader: true,
                    run: Some(run),
                })
            }
            None => {
                debug!(run_id = %run_id, runner_id = %runner_id, "Leadership already taken");
                Ok(SetLeaderResponse {
                    leader: false,
                    run: None,
                })
            }
        }
    }
}
