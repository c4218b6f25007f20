//! Scheduling: recurrence parsing, due-run selection and the pipeline registry.

pub mod cron;
pub mod registry;

pub use cron::{MAX_BACKFILL_RUNS, Recurrence, ScheduleSpec};
pub use registry::{PipelineRegistry, RegisteredPipeline};
