//! Local runner: executes a task graph the way a scheduler would.
//!
//! Tasks start as soon as every upstream task has succeeded. Independent
//! tasks run concurrently up to a configurable limit. A failed task marks its
//! descendants `UpstreamFailed`; unrelated branches keep going. The runner
//! never retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::error::{PipelineError, RunError};
use crate::graph::{TaskGraph, TaskId, TaskNode};
use crate::persistence;
use crate::workflow::types::{RunState, RunStatus, TaskStatus};

/// Executes one task. Implemented by the pipeline for its task type.
#[async_trait]
pub trait TaskExecutor<T>: Send + Sync {
    async fn execute(&self, ctx: &RunContext, id: &TaskId, task: &T)
    -> Result<Value, PipelineError>;
}

struct TaskOutcome {
    index: NodeIndex,
    result: Result<Value, PipelineError>,
    finished_at: DateTime<Utc>,
}

async fn run_task<T: Sync>(
    executor: &dyn TaskExecutor<T>,
    ctx: &RunContext,
    index: NodeIndex,
    node: &TaskNode<T>,
) -> TaskOutcome {
    let result = executor.execute(ctx, &node.id, &node.task).await;
    TaskOutcome {
        index,
        result,
        finished_at: Utc::now(),
    }
}

/// Runs task graphs and keeps the state of every run it has executed.
pub struct LocalRunner<T> {
    executor: Arc<dyn TaskExecutor<T>>,
    max_parallel: usize,
    state_dir: Option<PathBuf>,
    runs: Arc<Mutex<HashMap<Uuid, RunState>>>,
}

impl<T: Send + Sync> LocalRunner<T> {
    pub fn new(executor: Arc<dyn TaskExecutor<T>>) -> Self {
        Self {
            executor,
            max_parallel: 4,
            state_dir: None,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Limit the number of tasks executing at once (minimum 1).
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Persist the final state of each run as `<dir>/<run_id>.json`.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Execute every task of `graph` once, respecting its edges.
    ///
    /// Task failures are recorded in the returned state; an `Err` means the
    /// graph itself was unusable or the state could not be persisted.
    pub async fn run(
        &self,
        graph: &TaskGraph<T>,
        ctx: RunContext,
    ) -> Result<RunState, PipelineError> {
        graph.validate()?;
        let dag = graph.inner();

        let mut state = RunState::new(&ctx, graph.tasks().map(|n| &n.id));
        info!(
            run_id = %ctx.run_id,
            pipeline = ctx.pipeline_id.as_str(),
            tasks = graph.len(),
            "Starting run"
        );
        self.runs.lock().await.insert(ctx.run_id, state.clone());

        let mut waiting_on: HashMap<NodeIndex, usize> = dag
            .node_indices()
            .map(|n| (n, dag.neighbors_directed(n, Direction::Incoming).count()))
            .collect();
        let mut ready: VecDeque<NodeIndex> = dag
            .node_indices()
            .filter(|n| waiting_on[n] == 0)
            .collect();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < self.max_parallel {
                let Some(index) = ready.pop_front() else {
                    break;
                };
                let node = &dag[index];
                if let Some(record) = state.tasks.get_mut(&node.id) {
                    record.status = TaskStatus::Running;
                    record.started_at = Some(Utc::now());
                }
                state.start_order.push(node.id.clone());
                info!(run_id = %ctx.run_id, task = %node.id, "Task started");
                in_flight.push(run_task(self.executor.as_ref(), &ctx, index, node));
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };
            let node = &dag[outcome.index];

            match outcome.result {
                Ok(output) => {
                    info!(run_id = %ctx.run_id, task = %node.id, "Task succeeded");
                    if let Some(record) = state.tasks.get_mut(&node.id) {
                        record.status = TaskStatus::Succeeded;
                        record.finished_at = Some(outcome.finished_at);
                        record.output = Some(output);
                    }
                    for next in dag.neighbors_directed(outcome.index, Direction::Outgoing) {
                        let Some(remaining) = waiting_on.get_mut(&next) else {
                            continue;
                        };
                        *remaining -= 1;
                        let still_pending = state
                            .tasks
                            .get(&dag[next].id)
                            .is_some_and(|r| r.status == TaskStatus::Pending);
                        if *remaining == 0 && still_pending {
                            ready.push_back(next);
                        }
                    }
                }
                Err(err) => {
                    error!(run_id = %ctx.run_id, task = %node.id, error = %err, "Task failed");
                    if let Some(record) = state.tasks.get_mut(&node.id) {
                        record.status = TaskStatus::Failed;
                        record.finished_at = Some(outcome.finished_at);
                        record.error = Some(err.to_string());
                    }
                    let mut dfs = Dfs::new(dag, outcome.index);
                    while let Some(descendant) = dfs.next(dag) {
                        if descendant == outcome.index {
                            continue;
                        }
                        if let Some(record) = state.tasks.get_mut(&dag[descendant].id) {
                            if record.status == TaskStatus::Pending {
                                warn!(
                                    run_id = %ctx.run_id,
                                    task = %dag[descendant].id,
                                    upstream = %node.id,
                                    "Skipping task after upstream failure"
                                );
                                record.status = TaskStatus::UpstreamFailed;
                            }
                        }
                    }
                }
            }
        }

        let all_succeeded = state
            .tasks
            .values()
            .all(|r| r.status == TaskStatus::Succeeded);
        state.status = if all_succeeded {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        state.finished_at = Some(Utc::now());
        info!(run_id = %ctx.run_id, status = %state.status, "Run finished");

        self.runs.lock().await.insert(state.run_id, state.clone());

        if let Some(ref dir) = self.state_dir {
            let path = persistence::run_state_path(dir, state.run_id);
            persistence::atomic_write_json(&path, &state).map_err(|e| RunError::Persistence {
                message: format!("{}: {}", path.display(), e),
            })?;
        }

        Ok(state)
    }

    /// Get the state of a run executed by this runner.
    pub async fn get_status(&self, run_id: Uuid) -> Result<RunState, PipelineError> {
        let runs = self.runs.lock().await;
        runs.get(&run_id)
            .cloned()
            .ok_or_else(|| RunError::NotFound { run_id }.into())
    }

    /// List all runs executed by this runner.
    pub async fn list_runs(&self) -> Vec<RunState> {
        let runs = self.runs.lock().await;
        runs.values().cloned().collect()
    }

    /// Load a persisted run state from disk.
    pub fn load_state(dir: &Path, run_id: Uuid) -> Result<RunState, PipelineError> {
        let path = persistence::run_state_path(dir, run_id);
        persistence::load_json(&path)?.ok_or_else(|| RunError::NotFound { run_id }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Executor that fails selected tasks and optionally sleeps.
    struct ScriptedExecutor {
        failing: HashSet<String>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor<u32> for ScriptedExecutor {
        async fn execute(
            &self,
            _ctx: &RunContext,
            id: &TaskId,
            task: &u32,
        ) -> Result<Value, PipelineError> {
            self.calls.lock().await.push(id.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.contains(id.as_str()) {
                return Err(RemoteError::Transport {
                    service: "test".into(),
                    message: format!("{} exploded", id),
                }
                .into());
            }
            Ok(Value::from(*task))
        }
    }

    fn fan_out_graph() -> TaskGraph<u32> {
        let mut graph = TaskGraph::new();
        let root = graph.add_task("root", 0).unwrap();
        for branch in ["left", "right"] {
            let first = graph.add_task(format!("{}_1", branch), 1).unwrap();
            let second = graph.add_task(format!("{}_2", branch), 2).unwrap();
            graph.chain(&[root.clone(), first, second]).unwrap();
        }
        graph
    }

    fn ctx() -> RunContext {
        RunContext::new("test_pipeline", Utc::now())
    }

    #[tokio::test]
    async fn test_run_completes_all_tasks() {
        let runner = LocalRunner::new(Arc::new(ScriptedExecutor::new(&[])));
        let state = runner.run(&fan_out_graph(), ctx()).await.unwrap();
        assert_eq!(state.status, RunStatus::Succeeded);
        assert_eq!(state.tasks_with_status(TaskStatus::Succeeded).len(), 5);
        assert_eq!(state.task("left_2").unwrap().output, Some(Value::from(2)));
    }

    #[tokio::test]
    async fn test_run_respects_edges() {
        let runner = LocalRunner::new(Arc::new(ScriptedExecutor::new(&[])));
        let graph = fan_out_graph();
        let state = runner.run(&graph, ctx()).await.unwrap();
        for (upstream, downstream) in graph.edges() {
            let up = state.task(upstream.as_str()).unwrap();
            let down = state.task(downstream.as_str()).unwrap();
            assert!(up.finished_at.unwrap() <= down.started_at.unwrap());
            assert!(
                state.start_position(upstream.as_str()) < state.start_position(downstream.as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_failure_skips_only_descendants() {
        let runner = LocalRunner::new(Arc::new(ScriptedExecutor::new(&["left_1"])));
        let state = runner.run(&fan_out_graph(), ctx()).await.unwrap();
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.task("left_1").unwrap().status, TaskStatus::Failed);
        assert!(state.task("left_1").unwrap().error.as_ref().unwrap().contains("exploded"));
        assert_eq!(state.task("left_2").unwrap().status, TaskStatus::UpstreamFailed);
        assert_eq!(state.task("right_2").unwrap().status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_root_failure_skips_everything() {
        let executor = Arc::new(ScriptedExecutor::new(&["root"]));
        let runner = LocalRunner::new(executor.clone());
        let state = runner.run(&fan_out_graph(), ctx()).await.unwrap();
        assert_eq!(state.tasks_with_status(TaskStatus::UpstreamFailed).len(), 4);
        assert_eq!(*executor.calls.lock().await, vec!["root".to_string()]);
    }

    #[tokio::test]
    async fn test_independent_branches_overlap() {
        let mut executor = ScriptedExecutor::new(&[]);
        executor.delay = Duration::from_millis(50);
        let runner = LocalRunner::new(Arc::new(executor)).with_max_parallel(4);
        let state = runner.run(&fan_out_graph(), ctx()).await.unwrap();
        let left = state.task("left_1").unwrap();
        let right = state.task("right_1").unwrap();
        assert!(left.started_at.unwrap() < right.finished_at.unwrap());
        assert!(right.started_at.unwrap() < left.finished_at.unwrap());
    }

    #[tokio::test]
    async fn test_empty_graph_is_rejected() {
        let runner = LocalRunner::new(Arc::new(ScriptedExecutor::new(&[])));
        let err = runner.run(&TaskGraph::new(), ctx()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Graph(_)));
    }

    #[tokio::test]
    async fn test_get_status_and_list_runs() {
        let runner = LocalRunner::new(Arc::new(ScriptedExecutor::new(&[])));
        let state = runner.run(&fan_out_graph(), ctx()).await.unwrap();
        runner.run(&fan_out_graph(), ctx()).await.unwrap();
        let status = runner.get_status(state.run_id).await.unwrap();
        assert_eq!(status.status, RunStatus::Succeeded);
        assert_eq!(runner.list_runs().await.len(), 2);
        assert!(runner.get_status(Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_state_persistence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let runner = LocalRunner::new(Arc::new(ScriptedExecutor::new(&["right_2"])))
            .with_state_dir(temp_dir.path());
        let state = runner.run(&fan_out_graph(), ctx()).await.unwrap();

        let loaded: RunState = LocalRunner::<u32>::load_state(temp_dir.path(), state.run_id).unwrap();
        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.task("right_2").unwrap().status, TaskStatus::Failed);
    }
}
