//! Registry of fully assembled pipelines and their schedules.
//!
//! A pipeline only becomes visible to a scheduler once its graph has been
//! validated; half-built definitions are never registered.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::{ConfigError, PipelineError, SchedulerError};
use crate::graph::TaskGraph;
use crate::scheduler::cron::ScheduleSpec;

/// A registered pipeline.
#[derive(Debug)]
pub struct RegisteredPipeline<T> {
    pub id: String,
    pub description: String,
    pub schedule: ScheduleSpec,
    pub graph: TaskGraph<T>,
    /// Logical date of the most recent run handed out by [`PipelineRegistry::mark_run`].
    pub last_run: Option<DateTime<Utc>>,
}

/// Pipelines known to a scheduler, keyed by ID.
#[derive(Debug)]
pub struct PipelineRegistry<T> {
    pipelines: BTreeMap<String, RegisteredPipeline<T>>,
}

impl<T> Default for PipelineRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PipelineRegistry<T> {
    pub fn new() -> Self {
        Self {
            pipelines: BTreeMap::new(),
        }
    }

    /// Register a pipeline. The graph must be non-empty and acyclic and the
    /// ID must not already be taken.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        schedule: ScheduleSpec,
        graph: TaskGraph<T>,
    ) -> Result<(), PipelineError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "pipeline id".to_string(),
            }
            .into());
        }
        if self.pipelines.contains_key(&id) {
            return Err(SchedulerError::AlreadyRegistered { id }.into());
        }
        graph.validate()?;
        info!(pipeline = id.as_str(), tasks = graph.len(), schedule = %schedule.recurrence, "Registered pipeline");
        self.pipelines.insert(
            id.clone(),
            RegisteredPipeline {
                id,
                description: description.into(),
                schedule,
                graph,
                last_run: None,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, id: &str) -> Result<RegisteredPipeline<T>, SchedulerError> {
        self.pipelines
            .remove(id)
            .ok_or_else(|| SchedulerError::NotFound { id: id.to_string() })
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredPipeline<T>> {
        self.pipelines.get(id)
    }

    /// Registered pipelines, sorted by ID.
    pub fn list(&self) -> Vec<&RegisteredPipeline<T>> {
        self.pipelines.values().collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Logical dates due for each pipeline at `now`. Pipelines with nothing
    /// due are omitted.
    pub fn due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(&str, Vec<DateTime<Utc>>)>, SchedulerError> {
        let mut due = Vec::new();
        for pipeline in self.pipelines.values() {
            let runs = pipeline.schedule.due_runs(pipeline.last_run, now)?;
            if !runs.is_empty() {
                due.push((pipeline.id.as_str(), runs));
            }
        }
        Ok(due)
    }

    /// Record that a run for `logical_date` has been started.
    pub fn mark_run(
        &mut self,
        id: &str,
        logical_date: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let pipeline = self
            .pipelines
            .get_mut(id)
            .ok_or_else(|| SchedulerError::NotFound { id: id.to_string() })?;
        if pipeline.last_run.is_none_or(|last| logical_date > last) {
            pipeline.last_run = Some(logical_date);
        }
        Ok(())
    }
}
