//! Launch of the statistics/validation analyzer as a Dataflow flex template.
//!
//! The launcher builds a typed payload and submits it; it does not wait for
//! the launched job. The service response is returned uninterpreted.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use dualtrain_core::config::{WINDOW_TIMESTAMP_FORMAT, parse_window_timestamp};
use dualtrain_core::{ConfigError, PipelineConfig, RemoteError, RunContext};

use crate::queries;
use crate::segment::HashRange;
use crate::services::JobService;
use crate::table::TableRef;

/// File name of the schema under the dataset root.
pub const SCHEMA_FILE_NAME: &str = "taxi_schema.pbtxt";

/// Parameters understood by the analyzer template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerParameters {
    pub bq_project_id: String,
    pub query: String,
    pub start_time: String,
    pub end_time: String,
    pub output_path: String,
    pub schema_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_stats_file: Option<String>,
}

/// The `launchParameter` body of a flex template launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlexTemplateLaunch {
    pub job_name: String,
    pub container_spec_gcs_path: String,
    pub parameters: AnalyzerParameters,
}

/// What to analyze. Built once per pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerRequest {
    pub job_name_prefix: String,
    /// Flex template spec location.
    pub template_path: String,
    pub query: String,
    pub start_time: NaiveDateTime,
    /// Upper window bound. `None` means the start of the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveDateTime>,
    pub output_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_stats_uri: Option<String>,
}

impl AnalyzerRequest {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let analyzer = &config.analyzer;
        let source: TableRef = config.warehouse.source_table.parse()?;
        let sample = HashRange::new(analyzer.sample_range.start, analyzer.sample_range.end)
            .map_err(|e| ConfigError::Invalid {
                field: "analyzer.sample_range".to_string(),
                message: e.to_string(),
            })?;
        let end_time = analyzer
            .window_end
            .as_deref()
            .map(|v| parse_window_timestamp("analyzer.window_end", v))
            .transpose()?;

        Ok(Self {
            job_name_prefix: analyzer.job_name_prefix.clone(),
            template_path: config.analyzer_template_path(),
            query: queries::analyzer_query(
                &source,
                &config.warehouse.row_key,
                config.warehouse.hash_buckets,
                &sample,
                analyzer.row_limit,
            ),
            start_time: parse_window_timestamp("analyzer.window_start", &analyzer.window_start)?,
            end_time,
            output_path: format!("{}/{}", config.dataset_root(), analyzer.stats_dir),
            baseline_stats_uri: analyzer.baseline_stats_uri.clone(),
        })
    }

    /// Same request, validating against the given baseline statistics.
    pub fn with_baseline(mut self, uri: impl Into<String>) -> Self {
        self.baseline_stats_uri = Some(uri.into());
        self
    }
}

/// Submits analyzer jobs to the job service.
#[derive(Clone)]
pub struct AnalyzerLauncher {
    jobs: Arc<dyn JobService>,
    project: String,
    location: String,
    dataset_root: String,
}

impl AnalyzerLauncher {
    pub fn new(
        jobs: Arc<dyn JobService>,
        project: impl Into<String>,
        location: impl Into<String>,
        dataset_root: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            project: project.into(),
            location: location.into(),
            dataset_root: dataset_root.into(),
        }
    }

    pub fn from_config(jobs: Arc<dyn JobService>, config: &PipelineConfig) -> Self {
        Self::new(
            jobs,
            &config.gcp.project_id,
            &config.gcp.region,
            config.dataset_root(),
        )
    }

    /// `<prefix>-<YYYYmmdd-HHMMSS>-<run token>`, unique per run.
    pub fn job_name(prefix: &str, ctx: &RunContext) -> String {
        format!("{}-{}-{}", prefix, ctx.timestamp_tag(), ctx.run_token())
    }

    /// Build the launch payload for one run.
    pub fn build_launch(&self, ctx: &RunContext, request: &AnalyzerRequest) -> FlexTemplateLaunch {
        let end_time = request
            .end_time
            .unwrap_or_else(|| ctx.started_at.naive_utc());
        let baseline = request
            .baseline_stats_uri
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .map(str::to_string);

        FlexTemplateLaunch {
            job_name: Self::job_name(&request.job_name_prefix, ctx),
            container_spec_gcs_path: request.template_path.clone(),
            parameters: AnalyzerParameters {
                bq_project_id: self.project.clone(),
                query: request.query.clone(),
                start_time: request.start_time.format(WINDOW_TIMESTAMP_FORMAT).to_string(),
                end_time: end_time.format(WINDOW_TIMESTAMP_FORMAT).to_string(),
                output_path: request.output_path.clone(),
                schema_file: format!(
                    "{}/{}",
                    self.dataset_root.trim_end_matches('/'),
                    SCHEMA_FILE_NAME
                ),
                baseline_stats_file: baseline,
            },
        }
    }

    /// Build and submit the analyzer job, returning the service response.
    pub async fn launch(
        &self,
        ctx: &RunContext,
        request: &AnalyzerRequest,
    ) -> Result<Value, RemoteError> {
        let launch = self.build_launch(ctx, request);
        info!(
            run_id = %ctx.run_id,
            job_name = launch.job_name.as_str(),
            template = launch.container_spec_gcs_path.as_str(),
            baseline = launch.parameters.baseline_stats_file.is_some(),
            "Launching analyzer"
        );
        self.jobs
            .launch_flex_template(&self.location, &self.project, &launch)
            .await
    }
}
