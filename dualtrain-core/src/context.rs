//! Per-run identity handed to every task.
//!
//! Names that must be unique per run (such as launched job names) are derived
//! from the injected run ID rather than from the wall clock alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and timing of a single pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub pipeline_id: String,
    /// The scheduled instant this run covers.
    pub logical_date: DateTime<Utc>,
    /// When the run actually began.
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    /// A fresh run with a random run ID, starting now.
    pub fn new(pipeline_id: impl Into<String>, logical_date: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline_id: pipeline_id.into(),
            logical_date,
            started_at: Utc::now(),
        }
    }

    /// Use a scheduler-provided run ID instead of a random one.
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Short, lowercase token identifying the run (first 8 hex digits of the run ID).
    pub fn run_token(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }

    /// Run start formatted as `YYYYmmdd-HHMMSS`.
    pub fn timestamp_tag(&self) -> String {
        self.started_at.format("%Y%m%d-%H%M%S").to_string()
    }
}
