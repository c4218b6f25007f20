//! Run state definitions for the local runner.
//!
//! Defines per-task records, task and run status enums, and the persisted
//! state of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::context::RunContext;
use crate::graph::TaskId;

/// Status of a single task within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Not started because an upstream task failed.
    UpstreamFailed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::UpstreamFailed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::UpstreamFailed => write!(f, "upstream_failed"),
        }
    }
}

/// Status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What happened to one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
        }
    }
}

/// Persistent state of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub logical_date: DateTime<Utc>,
    pub status: RunStatus,
    pub tasks: BTreeMap<TaskId, TaskRecord>,
    /// Task IDs in the order they started.
    pub start_order: Vec<TaskId>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Create the state for a fresh run with every task pending.
    pub fn new<'a>(ctx: &RunContext, task_ids: impl IntoIterator<Item = &'a TaskId>) -> Self {
        Self {
            run_id: ctx.run_id,
            pipeline_id: ctx.pipeline_id.clone(),
            logical_date: ctx.logical_date,
            status: RunStatus::Running,
            tasks: task_ids
                .into_iter()
                .map(|id| (id.clone(), TaskRecord::pending()))
                .collect(),
            start_order: Vec::new(),
            started_at: ctx.started_at,
            finished_at: None,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.get(&TaskId::new(id))
    }

    /// IDs of tasks in the given status, sorted.
    pub fn tasks_with_status(&self, status: TaskStatus) -> Vec<&TaskId> {
        self.tasks
            .iter()
            .filter(|(_, record)| record.status == status)
            .map(|(id, _)| id)
            .collect()
    }

    /// Position of `id` in the start order.
    pub fn start_position(&self, id: &str) -> Option<usize> {
        self.start_order.iter().position(|t| t.as_str() == id)
    }
}
