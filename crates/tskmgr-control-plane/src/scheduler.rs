//! Pending task assignment: hands each Pending task to exactly one runner.
//!
//! Runners poll; nothing is pushed. A poll ranks the run's Pending tasks for
//! the caller and tries to claim them in order. A claim is one conditional
//! update on the task row that re-checks `Pending`, so a task lost to a
//! concurrent poll is simply skipped.
//!
//! The run is read before the claim and not re-checked under the task lock.
//! A run closed or aborted in between can still hand out that one task; if
//! it later fails, aggregation leaves the ended run as it is.
//!
//! A poll that finds a Failed task on a run that has not ended runs the
//! aggregation pass the failing call could not commit.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tskmgr_core::{
    ordering, run_lifecycle, task_lifecycle, CoreError, Run, RunId, RunStatus, RunnerId,
    RunnerInfo, Task, TaskId, TaskStatus,
};

use crate::aggregator::RunAggregator;
use crate::config::AssignmentPolicy;
use crate::retry::with_retry;
use crate::service::{ServiceError, ServiceResult};
use crate::state::AppState;
use crate::store::{TaskOrder, TaskQuery};

/// Answer to a runner's poll. `continue: false` tells the runner to stop
/// polling this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTaskResponse {
    #[serde(rename = "continue")]
    pub should_continue: bool,
    pub task: Option<Task>,
}

impl StartTaskResponse {
    fn stop() -> Self {
        Self {
            should_continue: false,
            task: None,
        }
    }

    fn assigned(task: Task) -> Self {
        Self {
            should_continue: true,
            task: Some(task),
        }
    }
}

/// Pending task assigner.
pub struct PendingTaskAssigner {
    state: Arc<AppState>,
}

impl PendingTaskAssigner {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Find and claim the best Pending task of `run_id` for `runner_id`.
    pub async fn find_pending_task(
        &self,
        run_id: &RunId,
        runner_id: &RunnerId,
        runner_info: RunnerInfo,
    ) -> ServiceResult<StartTaskResponse> {
        if runner_id.is_blank() {
            return Err(CoreError::InvalidInput("runnerId must not be empty".to_string()).into());
        }

        loop {
            let run = self.find_run(run_id).await?;
            let tasks = self.query(TaskQuery::for_run(run_id)).await?;
            let run = self.repair_failed(run, &tasks).await;

            if !self.should_assign(&run, &tasks) {
                debug!(run_id = %run_id, runner_id = %runner_id, "Nothing to assign");
                return Ok(StartTaskResponse::stop());
            }

            let last_completed = if run.affinity {
                self.last_completed(run_id, runner_id).await?
            } else {
                None
            };

            let pending: Vec<Task> = tasks
                .into_iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .collect();
            let ranked = ordering::rank_pending(&run, pending, last_completed.as_ref());

            for candidate in ranked {
                let Some(task) = self.claim(&candidate.id, runner_id, &runner_info).await? else {
                    debug!(
                        run_id = %run_id,
                        task_id = %candidate.id,
                        runner_id = %runner_id,
                        "Lost claim race"
                    );
                    continue;
                };

                info!(
                    run_id = %run_id,
                    task_id = %task.id,
                    runner_id = %runner_id,
                    "Task assigned"
                );
                // The claim is committed; the task goes out either way.
                if let Err(err) = self.mark_run_started(run_id).await {
                    warn!(run_id = %run_id, task_id = %task.id, error = %err, "Failed to mark run started");
                }
                return Ok(StartTaskResponse::assigned(task));
            }

            debug!(run_id = %run_id, runner_id = %runner_id, "All candidates taken, re-polling");
        }
    }

    fn should_assign(&self, run: &Run, tasks: &[Task]) -> bool {
        if run.closed {
            return false;
        }

        match run.status {
            RunStatus::Completed | RunStatus::Aborted => return false,
            RunStatus::Failed => {
                let drain = self.state.config.assignment_policy
                    == AssignmentPolicy::DrainUnlessFailFast
                    && !run.fail_fast;
                if !drain {
                    return false;
                }
            }
            RunStatus::Created | RunStatus::Started => {}
        }

        // Checked on the tasks too: the run may not have caught up yet.
        let stop_on_failure = run.fail_fast
            || self.state.config.assignment_policy == AssignmentPolicy::StopOnFailure;
        if stop_on_failure && tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            return false;
        }

        tasks.iter().any(|t| t.status == TaskStatus::Pending)
    }

    /// Aggregate a run that still looks live but already has a Failed task.
    /// Best effort: on error the stale run is kept and the next poll retries.
    async fn repair_failed(&self, run: Run, tasks: &[Task]) -> Run {
        if run.has_ended() || !tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            return run;
        }
        match RunAggregator::new(self.state.clone()).reconcile(&run.id).await {
            Ok(repaired) => repaired,
            Err(err) => {
                warn!(run_id = %run.id, error = %err, "Failed to aggregate run with failed task");
                run
            }
        }
    }

    /// Atomically move a still-Pending task to Running. `None` if someone
    /// else got there first.
    async fn claim(
        &self,
        task_id: &TaskId,
        runner_id: &RunnerId,
        runner_info: &RunnerInfo,
    ) -> ServiceResult<Option<Task>> {
        let store = &self.state.store;
        let claimed = with_retry(self.state.config.retry_policy(), "claim_task", || {
            let runner = runner_id.clone();
            let info = runner_info.clone();
            store.update_task(
                task_id,
                Box::new(move |task: &Task| {
                    if task.status != TaskStatus::Pending {
                        return Ok(None);
                    }
                    task_lifecycle::start(task, &runner, info, Utc::now()).map(Some)
                }),
            )
        })
        .await?;
        Ok(claimed)
    }

    async fn mark_run_started(&self, run_id: &RunId) -> ServiceResult<()> {
        let store = &self.state.store;
        let started = with_retry(self.state.config.retry_policy(), "mark_run_started", || {
            store.update_run(run_id, Box::new(|run: &Run| Ok(run_lifecycle::mark_started(run))))
        })
        .await?;

        if started.is_some() {
            info!(run_id = %run_id, "Run started");
        }
        Ok(())
    }

    async fn last_completed(&self, run_id: &RunId, runner_id: &RunnerId) -> ServiceResult<Option<Task>> {
        let query = TaskQuery::for_run(run_id)
            .with_runner(runner_id)
            .with_status(TaskStatus::Completed)
            .ordered_by(TaskOrder::EndedDesc)
            .limit(1);
        Ok(self.query(query).await?.into_iter().next())
    }

    async fn find_run(&self, run_id: &RunId) -> ServiceResult<Run> {
        let store = &self.state.store;
        with_retry(self.state.config.retry_policy(), "find_run", || store.find_run(run_id))
            .await?
            .ok_or_else(|| ServiceError::Core(CoreError::RunNotFound(run_id.clone())))
    }

    async fn query(&self, query: TaskQuery) -> ServiceResult<Vec<Task>> {
        let store = &self.state.store;
        let tasks =
            with_retry(self.state.config.retry_policy(), "query_tasks", || store.query_tasks(&query))
                .await?;
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::config::Config;
    use crate::service::{RunService, TaskService};
    use crate::store::{Gate, MemoryStore, Mutation, Store, StoreError, StoreResult};
    use tskmgr_core::{NewRun, NewTask, TaskPriority};

    /// Memory store whose next `failures` run updates time out on the lock.
    struct FlakyRuns {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    impl FlakyRuns {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(Duration::from_millis(100)),
                failures: AtomicU32::new(0),
            }
        }

        fn fail_next(&self, n: u32) {
            self.failures.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Store for FlakyRuns {
        async fn insert_run(&self, run: Run) -> StoreResult<()> {
            self.inner.insert_run(run).await
        }

        async fn insert_tasks(&self, run_id: &RunId, tasks: Vec<Task>, gate: Gate<Run>) -> StoreResult<()> {
            self.inner.insert_tasks(run_id, tasks, gate).await
        }

        async fn find_run(&self, id: &RunId) -> StoreResult<Option<Run>> {
            self.inner.find_run(id).await
        }

        async fn find_task(&self, id: &TaskId) -> StoreResult<Option<Task>> {
            self.inner.find_task(id).await
        }

        async fn query_tasks(&self, query: &TaskQuery) -> StoreResult<Vec<Task>> {
            self.inner.query_tasks(query).await
        }

        async fn update_run(&self, id: &RunId, mutation: Mutation<Run>) -> StoreResult<Option<Run>> {
            let timed_out = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if timed_out {
                return Err(StoreError::LockTimeout {
                    entity: "run",
                    id: id.to_string(),
                });
            }
            self.inner.update_run(id, mutation).await
        }

        async fn update_task(&self, id: &TaskId, mutation: Mutation<Task>) -> StoreResult<Option<Task>> {
            self.inner.update_task(id, mutation).await
        }
    }

    async fn flaky_setup(tasks: Vec<NewTask>) -> (Arc<FlakyRuns>, Arc<AppState>, Run) {
        let store = Arc::new(FlakyRuns::new());
        let config = Config {
            lock_retries: 1,
            retry_backoff_ms: 1,
            ..Config::default()
        };
        let state = AppState::with_store(store.clone(), config);
        let runs = RunService::new(state.clone());
        let run = runs.create_run(NewRun::new("r", "ci")).await.unwrap();
        runs.create_tasks(&run.id, tasks).await.unwrap();
        (store, state, run)
    }

    fn info() -> RunnerInfo {
        RunnerInfo::from([("host".to_string(), "ci-01".to_string())])
    }

    async fn setup(config: Config, spec: NewRun, tasks: Vec<NewTask>) -> (Arc<AppState>, Run, Vec<Task>) {
        let state = AppState::new(config);
        let runs = RunService::new(state.clone());
        let run = runs.create_run(spec).await.unwrap();
        let tasks = runs.create_tasks(&run.id, tasks).await.unwrap();
        (state, run, tasks)
    }

    fn unit(name: &str) -> NewTask {
        NewTask::new(name, "unit", "make")
    }

    #[tokio::test]
    async fn test_first_start_marks_run_started() {
        let (state, run, _) = setup(
            Config::default(),
            NewRun::new("r", "ci"),
            vec![unit("a"), unit("b")],
        )
        .await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let runner = RunnerId::new("runner-1");

        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(res.should_continue);
        let task = res.task.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.runner_id, Some(runner.clone()));
        assert!(task.started_at.is_some());

        let run = state.store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Started);

        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(res.task.is_some());
        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(!res.should_continue);
        assert!(res.task.is_none());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let state = AppState::new(Config::default());
        let err = PendingTaskAssigner::new(state)
            .find_pending_task(&RunId::new("missing"), &RunnerId::new("r"), info())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_closed_run_stops_assignment() {
        let (state, run, _) = setup(Config::default(), NewRun::new("r", "ci"), vec![unit("a")]).await;
        RunService::new(state.clone()).close_run(&run.id).await.unwrap();

        let res = PendingTaskAssigner::new(state)
            .find_pending_task(&run.id, &RunnerId::new("r"), info())
            .await
            .unwrap();
        assert!(!res.should_continue);
    }

    #[tokio::test]
    async fn test_failed_run_stops_by_default() {
        let (state, run, _) = setup(
            Config::default(),
            NewRun::new("r", "ci"),
            vec![unit("a"), unit("b")],
        )
        .await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let runner = RunnerId::new("r");

        let first = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        let failed = TaskService::new(state)
            .fail_task(&first.task.unwrap().id)
            .await
            .unwrap();
        assert_eq!(failed.run.status, RunStatus::Failed);

        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(!res.should_continue);
        assert!(res.task.is_none());
    }

    #[tokio::test]
    async fn test_drain_policy_hands_out_remaining_tasks() {
        let config = Config {
            assignment_policy: AssignmentPolicy::DrainUnlessFailFast,
            ..Config::default()
        };
        let (state, run, _) = setup(config, NewRun::new("r", "ci"), vec![unit("a"), unit("b")]).await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let runner = RunnerId::new("r");

        let first = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        TaskService::new(state)
            .fail_task(&first.task.unwrap().id)
            .await
            .unwrap();

        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(res.should_continue);
        assert!(res.task.is_some());
    }

    #[tokio::test]
    async fn test_fail_fast_overrides_drain_policy() {
        let config = Config {
            assignment_policy: AssignmentPolicy::DrainUnlessFailFast,
            ..Config::default()
        };
        let (state, run, _) = setup(
            config,
            NewRun::new("r", "ci").with_fail_fast(true),
            vec![unit("a"), unit("b")],
        )
        .await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let runner = RunnerId::new("r");

        let first = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        TaskService::new(state)
            .fail_task(&first.task.unwrap().id)
            .await
            .unwrap();

        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(!res.should_continue);
    }

    #[tokio::test]
    async fn test_assigns_longest_first() {
        let (state, run, _) = setup(
            Config::default(),
            NewRun::new("r", "ci"),
            vec![
                unit("short").with_avg_duration(1.0),
                unit("unknown"),
                unit("long").with_avg_duration(30.0),
            ],
        )
        .await;
        let assigner = PendingTaskAssigner::new(state);
        let runner = RunnerId::new("r");

        let mut order = Vec::new();
        while let Some(task) = assigner
            .find_pending_task(&run.id, &runner, info())
            .await
            .unwrap()
            .task
        {
            order.push(task.name);
        }
        assert_eq!(order, vec!["long", "short", "unknown"]);
    }

    #[tokio::test]
    async fn test_prioritization_puts_shortest_first() {
        let (state, run, _) = setup(
            Config::default(),
            NewRun::new("r", "ci")
                .with_prioritization(vec![TaskPriority::Shortest, TaskPriority::Longest]),
            vec![
                unit("long").with_avg_duration(30.0),
                unit("quick")
                    .with_priority(TaskPriority::Shortest)
                    .with_avg_duration(2.0),
            ],
        )
        .await;

        let res = PendingTaskAssigner::new(state)
            .find_pending_task(&run.id, &RunnerId::new("r"), info())
            .await
            .unwrap();
        assert_eq!(res.task.unwrap().name, "quick");
    }

    #[tokio::test]
    async fn test_affinity_follows_last_completed_task() {
        let (state, run, _) = setup(
            Config::default(),
            NewRun::new("r", "ci").with_affinity(true),
            vec![
                NewTask::new("e2e-1", "e2e", "npm run e2e"),
                NewTask::new("unit-1", "unit", "npm test"),
                NewTask::new("unit-2", "unit", "npm test"),
                NewTask::new("e2e-2", "e2e", "npm run e2e"),
            ],
        )
        .await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let tasks = TaskService::new(state);
        let runner = RunnerId::new("r");

        let first = assigner
            .find_pending_task(&run.id, &runner, info())
            .await
            .unwrap()
            .task
            .unwrap();
        assert_eq!(first.name, "e2e-1");
        tasks.complete_task(&first.id, false).await.unwrap();

        let second = assigner
            .find_pending_task(&run.id, &runner, info())
            .await
            .unwrap()
            .task
            .unwrap();
        assert_eq!(second.name, "e2e-2");

        let other = assigner
            .find_pending_task(&run.id, &RunnerId::new("fresh"), info())
            .await
            .unwrap()
            .task
            .unwrap();
        assert_eq!(other.name, "unit-1");
    }

    #[tokio::test]
    async fn test_blank_runner_rejected() {
        let (state, run, _) = setup(Config::default(), NewRun::new("r", "ci"), vec![unit("a")]).await;
        let err = PendingTaskAssigner::new(state)
            .find_pending_task(&run.id, &RunnerId::new(""), info())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Core(CoreError::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_polls_never_share_a_task() {
        let specs = (0..20).map(|i| unit(&format!("t{i}"))).collect();
        let (state, run, created) = setup(Config::default(), NewRun::new("r", "ci"), specs).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let state = state.clone();
            let run_id = run.id.clone();
            handles.push(tokio::spawn(async move {
                let assigner = PendingTaskAssigner::new(state);
                let runner = RunnerId::new(format!("runner-{i}"));
                let mut got = Vec::new();
                while let Some(task) = assigner
                    .find_pending_task(&run_id, &runner, RunnerInfo::new())
                    .await
                    .unwrap()
                    .task
                {
                    got.push(task.id);
                }
                got
            }));
        }

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "task handed out twice");
                total += 1;
            }
        }
        assert_eq!(total, created.len());
    }

    #[tokio::test]
    async fn test_poll_fails_run_left_started_by_lost_aggregation() {
        let (store, state, run) = flaky_setup(vec![unit("a"), unit("b")]).await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let runner = RunnerId::new("r");

        let first = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        let first = first.task.unwrap();

        store.fail_next(1);
        let err = TaskService::new(state.clone()).fail_task(&first.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));
        let stale = state.store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stale.status, RunStatus::Started);

        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(!res.should_continue);
        assert!(res.task.is_none());
        let repaired = state.store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(repaired.status, RunStatus::Failed);
        assert!(repaired.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_task_stops_assignment_while_run_lags() {
        let (store, state, run) = flaky_setup(vec![unit("a"), unit("b")]).await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let runner = RunnerId::new("r");

        let first = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        store.fail_next(u32::MAX);
        TaskService::new(state.clone())
            .fail_task(&first.task.unwrap().id)
            .await
            .unwrap_err();

        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(!res.should_continue);
        assert!(res.task.is_none());
        let run = state.store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Started);
    }

    #[tokio::test]
    async fn test_claim_survives_failed_run_start() {
        let (store, state, run) = flaky_setup(vec![unit("a"), unit("b")]).await;
        let assigner = PendingTaskAssigner::new(state.clone());
        let runner = RunnerId::new("r");

        store.fail_next(u32::MAX);
        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert!(res.should_continue);
        let task = res.task.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        let stored = state.store.find_task(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.runner_id, Some(runner.clone()));
        let lagging = state.store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(lagging.status, RunStatus::Created);

        store.fail_next(0);
        let res = assigner.find_pending_task(&run.id, &runner, info()).await.unwrap();
        assert_ne!(res.task.unwrap().id, task.id);
        let started = state.store.find_run(&run.id).await.unwrap().unwrap();
        assert_eq!(started.status, RunStatus::Started);
    }
}
