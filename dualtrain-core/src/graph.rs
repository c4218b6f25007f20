//! Task dependency graph.
//!
//! Uses petgraph's `DiGraph` to model tasks as nodes and "must finish before"
//! relations as edges. Tasks are addressed through [`TaskRef`] handles that
//! only the owning graph hands out, so edges and branch targets can never
//! point at a task that was not added.

use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::GraphError;

/// Identifier of a task within a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Handle to a task inside a specific [`TaskGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    graph: Uuid,
    index: NodeIndex,
    id: TaskId,
}

impl TaskRef {
    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

/// A task stored in the graph.
#[derive(Debug, Clone)]
pub struct TaskNode<T> {
    pub id: TaskId,
    pub task: T,
}

/// Serializable view of a graph's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphView {
    pub tasks: Vec<TaskId>,
    pub edges: Vec<(TaskId, TaskId)>,
}

/// A directed acyclic graph of tasks.
#[derive(Debug, Clone)]
pub struct TaskGraph<T> {
    id: Uuid,
    graph: DiGraph<TaskNode<T>, ()>,
    by_id: HashMap<TaskId, NodeIndex>,
}

impl<T> Default for TaskGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskGraph<T> {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            graph: DiGraph::new(),
            by_id: HashMap::new(),
        }
    }

    /// Add a task. Task IDs must be unique within the graph.
    pub fn add_task(&mut self, id: impl Into<String>, task: T) -> Result<TaskRef, GraphError> {
        let id = TaskId::new(id);
        if self.by_id.contains_key(&id) {
            return Err(GraphError::DuplicateTask { id: id.0 });
        }
        let index = self.graph.add_node(TaskNode {
            id: id.clone(),
            task,
        });
        self.by_id.insert(id.clone(), index);
        Ok(TaskRef {
            graph: self.id,
            index,
            id,
        })
    }

    /// Whether `task` was issued by this graph.
    pub fn owns(&self, task: &TaskRef) -> bool {
        task.graph == self.id && self.by_id.get(&task.id) == Some(&task.index)
    }

    fn check_owned(&self, task: &TaskRef) -> Result<(), GraphError> {
        if self.owns(task) {
            Ok(())
        } else {
            Err(GraphError::UnknownTask {
                id: task.id.0.clone(),
            })
        }
    }

    /// Declare that `upstream` must succeed before `downstream` starts.
    pub fn add_dependency(
        &mut self,
        upstream: &TaskRef,
        downstream: &TaskRef,
    ) -> Result<(), GraphError> {
        self.check_owned(upstream)?;
        self.check_owned(downstream)?;
        if upstream.index == downstream.index {
            return Err(GraphError::SelfDependency {
                id: upstream.id.0.clone(),
            });
        }
        if has_path_connecting(&self.graph, downstream.index, upstream.index, None) {
            return Err(GraphError::Cycle {
                id: downstream.id.0.clone(),
            });
        }
        if self.graph.find_edge(upstream.index, downstream.index).is_none() {
            self.graph.add_edge(upstream.index, downstream.index, ());
        }
        Ok(())
    }

    /// Link the given tasks into a linear chain, in order.
    pub fn chain(&mut self, tasks: &[TaskRef]) -> Result<(), GraphError> {
        for pair in tasks.windows(2) {
            self.add_dependency(&pair[0], &pair[1])?;
        }
        Ok(())
    }

    /// Look up a handle by task ID.
    pub fn task_ref(&self, id: &str) -> Option<TaskRef> {
        let id = TaskId::new(id);
        self.by_id.get(&id).map(|&index| TaskRef {
            graph: self.id,
            index,
            id,
        })
    }

    pub fn get(&self, id: &str) -> Option<&TaskNode<T>> {
        let index = self.by_id.get(&TaskId::new(id))?;
        self.graph.node_weight(*index)
    }

    /// The node behind a handle.
    pub fn node(&self, task: &TaskRef) -> Result<&TaskNode<T>, GraphError> {
        self.check_owned(task)?;
        self.graph
            .node_weight(task.index)
            .ok_or_else(|| GraphError::UnknownTask {
                id: task.id.0.clone(),
            })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode<T>> {
        self.graph.node_weights()
    }

    /// Direct upstream task IDs of `id`, sorted.
    pub fn upstream_of(&self, id: &str) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct downstream task IDs of `id`, sorted.
    pub fn downstream_of(&self, id: &str) -> Vec<&TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&TaskId> {
        let Some(&index) = self.by_id.get(&TaskId::new(id)) else {
            return Vec::new();
        };
        let mut ids: Vec<&TaskId> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| &self.graph[n].id)
            .collect();
        ids.sort();
        ids
    }

    /// Tasks with no upstream dependencies.
    pub fn roots(&self) -> Vec<&TaskId> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|n| &self.graph[n].id)
            .collect()
    }

    /// Whether `ancestor` must finish before `descendant` can start.
    pub fn precedes(&self, ancestor: &str, descendant: &str) -> bool {
        match (
            self.by_id.get(&TaskId::new(ancestor)),
            self.by_id.get(&TaskId::new(descendant)),
        ) {
            (Some(&a), Some(&d)) if a != d => has_path_connecting(&self.graph, a, d, None),
            _ => false,
        }
    }

    /// A valid execution order.
    pub fn topological_order(&self) -> Result<Vec<&TaskId>, GraphError> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|n| &self.graph[n].id).collect())
            .map_err(|cycle| GraphError::Cycle {
                id: self.graph[cycle.node_id()].id.0.clone(),
            })
    }

    /// Structural checks run before a graph is registered or executed.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.is_empty() {
            return Err(GraphError::Empty);
        }
        self.topological_order()?;
        Ok(())
    }

    /// All edges as `(upstream, downstream)` pairs, in insertion order.
    pub fn edges(&self) -> Vec<(&TaskId, &TaskId)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (&self.graph[a].id, &self.graph[b].id))
            .collect()
    }

    pub fn view(&self) -> GraphView {
        GraphView {
            tasks: self.tasks().map(|n| n.id.clone()).collect(),
            edges: self
                .edges()
                .into_iter()
                .map(|(a, b)| (a.clone(), b.clone()))
                .collect(),
        }
    }

    /// Render the graph in Graphviz DOT format.
    pub fn to_dot(&self, name: &str) -> String {
        let mut out = format!("digraph \"{}\" {{\n", name);
        for node in self.tasks() {
            out.push_str(&format!("    \"{}\";\n", node.id));
        }
        for (a, b) in self.edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", a, b));
        }
        out.push_str("}\n");
        out
    }

    pub(crate) fn inner(&self) -> &DiGraph<TaskNode<T>, ()> {
        &self.graph
    }
}

/// A two-way decision between tasks of the same graph.
///
/// Both targets are checked against the graph when the branch is built, so
/// selection can only ever yield a task that exists.
#[derive(Debug, Clone)]
pub struct Branch {
    when_true: TaskRef,
    when_false: TaskRef,
}

impl Branch {
    pub fn new<T>(
        graph: &TaskGraph<T>,
        when_true: TaskRef,
        when_false: TaskRef,
    ) -> Result<Self, GraphError> {
        for target in [&when_true, &when_false] {
            if !graph.owns(target) {
                return Err(GraphError::UnknownBranchTarget {
                    id: target.id.0.clone(),
                });
            }
        }
        Ok(Self {
            when_true,
            when_false,
        })
    }

    pub fn select(&self, condition: bool) -> &TaskRef {
        if condition {
            &self.when_true
        } else {
            &self.when_false
        }
    }

    /// The target not taken for `condition`.
    pub fn skipped(&self, condition: bool) -> &TaskRef {
        self.select(!condition)
    }
}
