//! Assembly of the full pipeline definition.
//!
//! Everything is built and validated once from an explicit
//! [`PipelineConfig`]. Any problem aborts assembly, so a
//! [`PipelineDefinition`] only exists in fully assembled form.

use serde::{Deserialize, Serialize};
use tracing::info;

use dualtrain_core::{
    GraphView, PipelineConfig, PipelineError, PipelineRegistry, ScheduleSpec, TaskGraph, TaskRef,
};

use crate::analyzer::AnalyzerRequest;
use crate::chains::{ChainSettings, SegmentChain, add_segment_chains};
use crate::segment::SegmentSet;
use crate::tasks::PipelineTask;

pub const PIPELINE_ID: &str = "dual_trainer_with_tfdv";
pub const PIPELINE_DESCRIPTION: &str = "Train evaluate and validate two models on taxi fare dataset. Select the best one and register it to Mlflow v0.30";
pub const ANALYZER_TASK_ID: &str = "tfdv_statistics_task";

/// Options every Dataflow job of the pipeline inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataflowDefaults {
    pub project: String,
    pub region: String,
    pub zone: String,
    pub temp_location: String,
}

impl DataflowDefaults {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            project: config.gcp.project_id.clone(),
            region: config.gcp.region.clone(),
            zone: config.gcp.zone.clone(),
            temp_location: config.staging_location(),
        }
    }
}

/// A fully assembled pipeline: graph plus scheduling metadata.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub id: String,
    pub description: String,
    pub schedule: ScheduleSpec,
    pub graph: TaskGraph<PipelineTask>,
    pub dataflow_defaults: DataflowDefaults,
    pub segments: SegmentSet,
    pub analyzer: TaskRef,
    pub chains: Vec<SegmentChain>,
}

/// Summary of a definition for display and export.
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionSummary<'a> {
    pub id: &'a str,
    pub description: &'a str,
    pub schedule: &'a ScheduleSpec,
    pub dataflow_default_options: &'a DataflowDefaults,
    pub graph: GraphView,
}

/// Build the pipeline from configuration.
pub fn assemble(config: &PipelineConfig) -> Result<PipelineDefinition, PipelineError> {
    config.validate()?;
    let schedule = config.schedule.to_spec()?;
    let segments = SegmentSet::from_config(config)?;
    let settings = ChainSettings::from_config(config)?;
    let request = AnalyzerRequest::from_config(config)?;

    let mut graph = TaskGraph::new();
    let analyzer = graph.add_task(ANALYZER_TASK_ID, PipelineTask::LaunchAnalyzer(request))?;
    let chains = add_segment_chains(&mut graph, &analyzer, &segments, &settings)?;
    graph.validate()?;

    info!(
        pipeline = PIPELINE_ID,
        tasks = graph.len(),
        segments = segments.len(),
        "Assembled pipeline"
    );

    Ok(PipelineDefinition {
        id: PIPELINE_ID.to_string(),
        description: PIPELINE_DESCRIPTION.to_string(),
        schedule,
        graph,
        dataflow_defaults: DataflowDefaults::from_config(config),
        segments,
        analyzer,
        chains,
    })
}

impl PipelineDefinition {
    /// Hand the definition to a scheduler registry.
    pub fn register(self, registry: &mut PipelineRegistry<PipelineTask>) -> Result<(), PipelineError> {
        registry.register(self.id, self.description, self.schedule, self.graph)
    }

    pub fn summary(&self) -> DefinitionSummary<'_> {
        DefinitionSummary {
            id: &self.id,
            description: &self.description,
            schedule: &self.schedule,
            dataflow_default_options: &self.dataflow_defaults,
            graph: self.graph.view(),
        }
    }

    pub fn to_dot(&self) -> String {
        self.graph.to_dot(&self.id)
    }
}

/// Assemble from configuration and register in one step. Nothing is
/// registered if assembly fails.
pub fn assemble_and_register(
    config: &PipelineConfig,
    registry: &mut PipelineRegistry<PipelineTask>,
) -> Result<(), PipelineError> {
    assemble(config)?.register(registry)
}
