//! Property-based tests for core components using proptest.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::Value;

use dualtrain_core::scheduler::{Recurrence, ScheduleSpec};
use dualtrain_core::{
    LocalRunner, PipelineError, RunContext, RunStatus, TaskExecutor, TaskGraph, TaskId,
};

/// Build a graph of `n` tasks where every edge points from a lower to a
/// higher index, which can never form a cycle.
fn forward_graph(n: usize, edges: &[(usize, usize)]) -> TaskGraph<usize> {
    let mut graph = TaskGraph::new();
    let refs: Vec<_> = (0..n)
        .map(|i| graph.add_task(format!("t{}", i), i).unwrap())
        .collect();
    for &(a, b) in edges {
        let (x, y) = (a % n, b % n);
        let (lo, hi) = (x.min(y), x.max(y));
        if lo != hi {
            graph.add_dependency(&refs[lo], &refs[hi]).unwrap();
        }
    }
    graph
}

#[test]
fn forward_graph_orders_indices_after_wrapping() {
    let graph = forward_graph(4, &[(3, 5), (6, 2)]);
    assert!(graph.precedes("t1", "t3"));
    assert!(graph.validate().is_ok());
    assert_eq!(graph.topological_order().unwrap().len(), 4);
}

struct EchoExecutor;

#[async_trait]
impl TaskExecutor<usize> for EchoExecutor {
    async fn execute(
        &self,
        _ctx: &RunContext,
        _id: &TaskId,
        task: &usize,
    ) -> Result<Value, PipelineError> {
        tokio::task::yield_now().await;
        Ok(Value::from(*task))
    }
}

// --- Task graph properties ---

proptest! {
    #[test]
    fn topological_order_respects_every_edge(
        n in 1usize..12,
        edges in prop::collection::vec((0usize..12, 0usize..12), 0..30),
    ) {
        let graph = forward_graph(n, &edges);
        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), n);
        let position = |id: &TaskId| order.iter().position(|t| *t == id).unwrap();
        for (up, down) in graph.edges() {
            prop_assert!(position(up) < position(down));
        }
    }

    #[test]
    fn back_edge_is_always_rejected(
        n in 2usize..10,
        edges in prop::collection::vec((0usize..10, 0usize..10), 0..20),
    ) {
        let mut graph = forward_graph(n, &edges);
        let first = graph.task_ref("t0").unwrap();
        let last = graph.task_ref(&format!("t{}", n - 1)).unwrap();
        if graph.precedes("t0", &format!("t{}", n - 1)) {
            prop_assert!(graph.add_dependency(&last, &first).is_err());
        }
        prop_assert!(graph.validate().is_ok());
    }

    #[test]
    fn runner_starts_tasks_after_their_upstreams(
        n in 1usize..10,
        edges in prop::collection::vec((0usize..10, 0usize..10), 0..20),
        parallel in 1usize..4,
    ) {
        let graph = forward_graph(n, &edges);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let state = runtime.block_on(async {
            LocalRunner::new(Arc::new(EchoExecutor))
                .with_max_parallel(parallel)
                .run(&graph, RunContext::new("prop", Utc::now()))
                .await
                .unwrap()
        });
        prop_assert_eq!(state.status, RunStatus::Succeeded);
        prop_assert_eq!(state.start_order.len(), n);
        for (up, down) in graph.edges() {
            prop_assert!(state.start_position(up.as_str()) < state.start_position(down.as_str()));
        }
    }
}

// --- Schedule properties ---

proptest! {
    #[test]
    fn hourly_due_runs_are_ordered_and_not_after_now(hours in 0i64..500, catchup in any::<bool>()) {
        let start = Utc.with_ymd_and_hms(2020, 9, 1, 0, 0, 0).unwrap();
        let spec = ScheduleSpec {
            recurrence: "@hourly".parse::<Recurrence>().unwrap(),
            start_date: start,
            catchup,
        };
        let now = start + chrono::Duration::hours(hours) + chrono::Duration::minutes(30);
        let due = spec.due_runs(None, now).unwrap();
        prop_assert!(due.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(due.iter().all(|t| *t <= now && *t >= start));
        if !catchup {
            prop_assert_eq!(due, vec![start + chrono::Duration::hours(hours)]);
        }
    }
}
