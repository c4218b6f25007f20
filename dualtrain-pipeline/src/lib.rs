//! # Dualtrain Pipeline
//!
//! The dual-trainer data pipeline: statistics/validation launch on Dataflow
//! followed by per-segment delete, split and export chains on BigQuery.
//!
//! - [`orchestrator::assemble`] builds the [`PipelineDefinition`] from a
//!   [`dualtrain_core::PipelineConfig`].
//! - [`tasks::PipelineTaskExecutor`] runs its tasks against the service
//!   traits in [`services`].
//! - [`gcp`] holds the REST clients; [`in_memory`] the local stand-ins.

pub mod analyzer;
pub mod chains;
pub mod existence;
pub mod gcp;
pub mod in_memory;
pub mod orchestrator;
pub mod queries;
pub mod segment;
pub mod services;
pub mod table;
pub mod tasks;

pub use analyzer::{AnalyzerLauncher, AnalyzerParameters, AnalyzerRequest, FlexTemplateLaunch};
pub use chains::SegmentChain;
pub use existence::{StatsBranch, TableExistence, check_table_exists};
pub use orchestrator::{
    ANALYZER_TASK_ID, DataflowDefaults, PIPELINE_ID, PipelineDefinition, assemble,
    assemble_and_register,
};
pub use segment::{HashRange, Segment, SegmentSet};
pub use services::{CatalogService, ExportJob, JobService, SplitJob, WarehouseService};
pub use table::TableRef;
pub use tasks::{PipelineTask, PipelineTaskExecutor};
