//! # Dualtrain Core
//!
//! Core library for the dual-trainer data pipeline.
//! Provides configuration, the task graph, scheduling primitives, the local
//! runner, run-state persistence, and the shared error types.

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod persistence;
pub mod scheduler;
pub mod workflow;

// Re-export commonly used types at the crate root.
pub use config::{
    AnalyzerConfig, GcpConfig, PipelineConfig, RangeConfig, RunnerConfig, ScheduleConfig,
    SegmentConfig, StorageConfig, WarehouseConfig, load_config,
};
pub use context::RunContext;
pub use error::{
    ConfigError, GraphError, PipelineError, RemoteError, Result, RunError, SchedulerError,
};
pub use graph::{Branch, GraphView, TaskGraph, TaskId, TaskNode, TaskRef};
pub use scheduler::{PipelineRegistry, Recurrence, RegisteredPipeline, ScheduleSpec};
pub use workflow::{LocalRunner, RunState, RunStatus, TaskExecutor, TaskRecord, TaskStatus};
