//! Pipeline task definitions and the executor that runs them against services.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use dualtrain_core::{PipelineError, RunContext, TaskExecutor, TaskId};

use crate::analyzer::{AnalyzerLauncher, AnalyzerRequest};
use crate::services::{ExportJob, SplitJob, WarehouseService};
use crate::table::TableRef;

/// One unit of work in the pipeline graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineTask {
    /// Submit the statistics/validation job.
    LaunchAnalyzer(AnalyzerRequest),
    /// Drop a segment table, succeeding when it is already gone.
    DeleteTable { table: TableRef },
    /// Materialize a segment into its table.
    SplitTable(SplitJob),
    /// Export a segment table to storage.
    ExportTable(ExportJob),
}

impl PipelineTask {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineTask::LaunchAnalyzer(_) => "launch_analyzer",
            PipelineTask::DeleteTable { .. } => "delete_table",
            PipelineTask::SplitTable(_) => "split_table",
            PipelineTask::ExportTable(_) => "export_table",
        }
    }
}

/// Runs [`PipelineTask`]s against a warehouse and a job launcher.
pub struct PipelineTaskExecutor {
    warehouse: Arc<dyn WarehouseService>,
    launcher: AnalyzerLauncher,
}

impl PipelineTaskExecutor {
    pub fn new(warehouse: Arc<dyn WarehouseService>, launcher: AnalyzerLauncher) -> Self {
        Self {
            warehouse,
            launcher,
        }
    }
}

#[async_trait]
impl TaskExecutor<PipelineTask> for PipelineTaskExecutor {
    async fn execute(
        &self,
        ctx: &RunContext,
        id: &TaskId,
        task: &PipelineTask,
    ) -> Result<Value, PipelineError> {
        info!(run_id = %ctx.run_id, task = %id, kind = task.kind(), "Executing task");
        match task {
            PipelineTask::LaunchAnalyzer(request) => Ok(self.launcher.launch(ctx, request).await?),
            PipelineTask::DeleteTable { table } => {
                let deleted = self.warehouse.delete_table(table, true).await?;
                Ok(json!({ "table": table.to_string(), "deleted": deleted }))
            }
            PipelineTask::SplitTable(job) => {
                self.warehouse.materialize(job).await?;
                Ok(json!({
                    "destination": job.destination.to_string(),
                    "range": job.range.to_string(),
                }))
            }
            PipelineTask::ExportTable(job) => {
                self.warehouse.export_table(job).await?;
                Ok(json!({
                    "source": job.source.to_string(),
                    "destination_uris": job.destination_uris,
                }))
            }
        }
    }
}
