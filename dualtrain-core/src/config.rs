//! Configuration system for dualtrain.
//!
//! Uses `figment` for layered configuration: defaults -> config file ->
//! legacy Composer environment -> `DUALTRAIN_` environment -> explicit overrides.
//! The workspace config lives at `.dualtrain/config.toml`.
//!
//! Every downstream identifier and storage path derives from the values here,
//! so [`PipelineConfig::validate`] runs before anything is assembled.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::scheduler::{Recurrence, ScheduleSpec};

/// Timestamp layout used for the analyzer time window (ISO-8601, second precision).
pub const WINDOW_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Environment variables recognised for compatibility with Cloud Composer deployments.
pub const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("GCP_PROJECT", "gcp.project_id"),
    ("COMPOSER_LOCATION", "gcp.region"),
    ("COMPOSER_GKE_ZONE", "gcp.zone"),
    ("MLFLOW_GCS_ROOT_URI", "storage.gcs_root_uri"),
    ("MLFLOW_TRACKING_URI", "storage.mlflow_tracking_uri"),
];

/// Top-level configuration for a dualtrain pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    /// Dataset segments, in declaration order.
    #[serde(default = "default_segments")]
    pub segments: Vec<SegmentConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gcp: GcpConfig::default(),
            storage: StorageConfig::default(),
            warehouse: WarehouseConfig::default(),
            analyzer: AnalyzerConfig::default(),
            segments: default_segments(),
            schedule: ScheduleConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

/// Google Cloud project placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    pub project_id: String,
    /// Region used for Dataflow launches and BigQuery job location.
    pub region: String,
    pub zone: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project_id: "edgeml-demo".to_string(),
            region: "us-central".to_string(),
            zone: "us-central1-a".to_string(),
        }
    }
}

/// Object storage roots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root bucket URI (e.g. `gs://my-bucket/mlflow`). Required.
    #[serde(default)]
    pub gcs_root_uri: String,
    /// Experiment tracking server URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mlflow_tracking_uri: Option<String>,
}

/// Source table and split/export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Fully qualified table the segments are split from.
    pub source_table: String,
    /// Dataset holding the per-segment destination tables.
    pub dataset: String,
    /// Base name of the destination tables; the segment postfix is appended.
    pub table: String,
    /// Column hashed to assign rows to buckets.
    pub row_key: String,
    /// Size of the hash domain.
    pub hash_buckets: u32,
    /// Row cap applied to each split query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_row_limit: Option<u64>,
    /// Field delimiter for CSV exports.
    pub field_delimiter: char,
    /// Interval between job status polls.
    pub poll_interval_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            source_table: "bigquery-public-data.chicago_taxi_trips.taxi_trips".to_string(),
            dataset: "chicago_taxi_trips".to_string(),
            table: "taxi_trips".to_string(),
            row_key: "unique_key".to_string(),
            hash_buckets: 100,
            split_row_limit: Some(1000),
            field_delimiter: '|',
            poll_interval_secs: 2,
        }
    }
}

/// Settings for the statistics/validation analyzer job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub job_name_prefix: String,
    /// Flex template spec file, relative to the storage root.
    pub template_file: String,
    /// Lower bound of the analyzed time window.
    pub window_start: String,
    /// Upper bound of the analyzed time window. Defaults to the run start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_end: Option<String>,
    /// Statistics output directory, relative to the dataset root.
    pub stats_dir: String,
    /// Previously captured statistics to validate against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_stats_uri: Option<String>,
    pub row_limit: u64,
    /// Hash buckets sampled for statistics.
    pub sample_range: RangeConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            job_name_prefix: "analyzer".to_string(),
            template_file: "tfdv_csv_analyzer.json".to_string(),
            window_start: "1990-01-01T00:00:00".to_string(),
            window_end: None,
            stats_dir: "stats".to_string(),
            baseline_stats_uri: None,
            row_limit: 100_000,
            sample_range: RangeConfig { start: 0, end: 11 },
        }
    }
}

/// A half-open range `[start, end)` of hash buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeConfig {
    pub start: u32,
    pub end: u32,
}

/// One dataset segment as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub postfix: String,
    pub range: RangeConfig,
}

impl SegmentConfig {
    pub fn new(postfix: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            postfix: postfix.into(),
            range: RangeConfig { start, end },
        }
    }
}

fn default_segments() -> Vec<SegmentConfig> {
    vec![
        SegmentConfig::new("training", 0, 80),
        SegmentConfig::new("eval", 80, 95),
        SegmentConfig::new("validation", 95, 100),
    ]
}

/// Scheduling metadata handed to the scheduler at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// `@once`, `@hourly`, `@daily`, `@weekly`, `@monthly` or a cron expression.
    pub interval: String,
    pub start_date: DateTime<Utc>,
    /// Whether missed intervals are back-filled.
    pub catchup: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: "@once".to_string(),
            start_date: Utc.with_ymd_and_hms(2020, 9, 1, 0, 0, 0).single().unwrap_or_default(),
            catchup: false,
        }
    }
}

impl ScheduleConfig {
    /// Parse the interval and build the schedule handed to the scheduler.
    pub fn to_spec(&self) -> Result<ScheduleSpec, ConfigError> {
        let recurrence: Recurrence =
            self.interval
                .parse()
                .map_err(|e: crate::error::SchedulerError| ConfigError::Invalid {
                    field: "schedule.interval".to_string(),
                    message: e.to_string(),
                })?;
        Ok(ScheduleSpec {
            recurrence,
            start_date: self.start_date,
            catchup: self.catchup,
        })
    }
}

/// Settings for the local runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound on tasks executing at the same time.
    pub max_parallel_tasks: usize,
    /// Directory for persisted run state. Nothing is written when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            state_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Check every required value, failing on the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("gcp.project_id", &self.gcp.project_id)?;
        require("gcp.region", &self.gcp.region)?;
        require("gcp.zone", &self.gcp.zone)?;
        require("storage.gcs_root_uri", &self.storage.gcs_root_uri)?;
        if !self.storage.gcs_root_uri.starts_with("gs://") {
            return Err(ConfigError::Invalid {
                field: "storage.gcs_root_uri".to_string(),
                message: format!("expected a gs:// URI, got '{}'", self.storage.gcs_root_uri),
            });
        }

        require("warehouse.source_table", &self.warehouse.source_table)?;
        if self.warehouse.source_table.split('.').count() != 3 {
            return Err(ConfigError::Invalid {
                field: "warehouse.source_table".to_string(),
                message: "expected <project>.<dataset>.<table>".to_string(),
            });
        }
        require("warehouse.dataset", &self.warehouse.dataset)?;
        require("warehouse.table", &self.warehouse.table)?;
        require("warehouse.row_key", &self.warehouse.row_key)?;
        if self.warehouse.hash_buckets == 0 {
            return Err(ConfigError::Invalid {
                field: "warehouse.hash_buckets".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        require("analyzer.job_name_prefix", &self.analyzer.job_name_prefix)?;
        // Dataflow job names match [a-z]([-a-z0-9]*[a-z0-9])?; a timestamp follows the prefix.
        let prefix = &self.analyzer.job_name_prefix;
        let starts_with_letter = prefix.starts_with(|c: char| c.is_ascii_lowercase());
        if !starts_with_letter
            || !prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::Invalid {
                field: "analyzer.job_name_prefix".to_string(),
                message: format!(
                    "'{}' must start with a lowercase letter and contain only [-a-z0-9]",
                    prefix
                ),
            });
        }
        require("analyzer.template_file", &self.analyzer.template_file)?;
        parse_window_timestamp("analyzer.window_start", &self.analyzer.window_start)?;
        if let Some(end) = &self.analyzer.window_end {
            parse_window_timestamp("analyzer.window_end", end)?;
        }
        let sample = self.analyzer.sample_range;
        if sample.start >= sample.end || sample.end > self.warehouse.hash_buckets {
            return Err(ConfigError::Invalid {
                field: "analyzer.sample_range".to_string(),
                message: format!(
                    "[{}, {}) is not a non-empty range within [0, {})",
                    sample.start, sample.end, self.warehouse.hash_buckets
                ),
            });
        }

        if self.segments.is_empty() {
            return Err(ConfigError::MissingField {
                field: "segments".to_string(),
            });
        }
        for segment in &self.segments {
            require("segments.postfix", &segment.postfix)?;
            if !segment
                .postfix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err(ConfigError::Invalid {
                    field: "segments.postfix".to_string(),
                    message: format!("'{}' must be lowercase alphanumeric", segment.postfix),
                });
            }
        }

        self.schedule.to_spec()?;

        if self.runner.max_parallel_tasks == 0 {
            return Err(ConfigError::Invalid {
                field: "runner.max_parallel_tasks".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Root of the dataset files: `<storage root>/data`.
    pub fn dataset_root(&self) -> String {
        format!("{}/data", self.storage.gcs_root_uri.trim_end_matches('/'))
    }

    /// Staging location for Dataflow temp files.
    pub fn staging_location(&self) -> String {
        format!(
            "{}/data-staging",
            self.storage.gcs_root_uri.trim_end_matches('/')
        )
    }

    /// Full path of the analyzer flex template spec.
    pub fn analyzer_template_path(&self) -> String {
        format!(
            "{}/{}",
            self.storage.gcs_root_uri.trim_end_matches('/'),
            self.analyzer.template_file
        )
    }

    /// Experiment tracking URI, treating an empty value as unset.
    pub fn tracking_uri(&self) -> Option<&str> {
        self.storage
            .mlflow_tracking_uri
            .as_deref()
            .filter(|uri| !uri.is_empty())
    }
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Parse a window bound in [`WINDOW_TIMESTAMP_FORMAT`].
pub fn parse_window_timestamp(field: &str, value: &str) -> Result<NaiveDateTime, ConfigError> {
    NaiveDateTime::parse_from_str(value, WINDOW_TIMESTAMP_FORMAT).map_err(|e| {
        ConfigError::Invalid {
            field: field.to_string(),
            message: format!("'{}': {}", value, e),
        }
    })
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables prefixed with `DUALTRAIN_` (`DUALTRAIN_GCP__REGION`)
/// 3. Composer environment variables (`GCP_PROJECT`, `MLFLOW_GCS_ROOT_URI`, ...)
/// 4. Explicit config file, or the workspace config (`.dualtrain/config.toml`)
/// 5. Built-in defaults
///
/// The result is not validated; call [`PipelineConfig::validate`].
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&PipelineConfig>,
) -> Result<PipelineConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    match config_file {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            figment = figment.merge(Toml::file(path));
        }
        None => {
            if let Some(ws) = workspace {
                let ws_config = ws.join(".dualtrain").join("config.toml");
                if ws_config.exists() {
                    figment = figment.merge(Toml::file(&ws_config));
                }
            }
        }
    }

    figment = figment.merge(Env::raw().filter_map(|key| {
        LEGACY_ENV_KEYS
            .iter()
            .find(|(name, _)| key == *name)
            .map(|(_, path)| (*path).into())
    }));

    figment = figment.merge(Env::prefixed("DUALTRAIN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// Location of the user-level data directory (logs, run state).
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "dualtrain", "dualtrain")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.storage.gcs_root_uri = "gs://edgeml-demo-bucket/mlflow".to_string();
        config
    }

    #[test]
    fn test_default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.gcp.project_id, "edgeml-demo");
        assert_eq!(config.gcp.region, "us-central");
        assert_eq!(config.gcp.zone, "us-central1-a");
        assert_eq!(config.warehouse.hash_buckets, 100);
        assert_eq!(config.warehouse.field_delimiter, '|');
        assert_eq!(config.schedule.interval, "@once");
        assert!(!config.schedule.catchup);
    }

    #[test]
    fn test_default_segments_are_declared_in_order() {
        let postfixes: Vec<_> = default_segments().into_iter().map(|s| s.postfix).collect();
        assert_eq!(postfixes, vec!["training", "eval", "validation"]);
    }

    #[test]
    fn test_validate_requires_storage_root() {
        let config = PipelineConfig::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "storage.gcs_root_uri"));
    }

    #[test]
    fn test_validate_rejects_non_gcs_root() {
        let mut config = valid_config();
        config.storage.gcs_root_uri = "/tmp/mlflow".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_defaults_with_root() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_schedule() {
        let mut config = valid_config();
        config.schedule.interval = "every tuesday".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("schedule.interval"));
    }

    #[test]
    fn test_validate_rejects_bad_window() {
        let mut config = valid_config();
        config.analyzer.window_start = "1990/01/01".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_segments() {
        let mut config = valid_config();
        config.segments.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_uppercase_postfix() {
        let mut config = valid_config();
        config.segments[0].postfix = "Training".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_job_name_prefix() {
        for prefix in ["Analyzer", "tfdv_stats", "1-analyzer", "stats job"] {
            let mut config = valid_config();
            config.analyzer.job_name_prefix = prefix.to_string();
            let err = config.validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { ref field, .. } if field == "analyzer.job_name_prefix"),
                "prefix {:?} gave {:?}",
                prefix,
                err
            );
        }

        let mut config = valid_config();
        config.analyzer.job_name_prefix = "tfdv-stats2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_paths() {
        let mut config = valid_config();
        config.storage.gcs_root_uri = "gs://bucket/root/".to_string();
        assert_eq!(config.dataset_root(), "gs://bucket/root/data");
        assert_eq!(config.staging_location(), "gs://bucket/root/data-staging");
        assert_eq!(
            config.analyzer_template_path(),
            "gs://bucket/root/tfdv_csv_analyzer.json"
        );
    }

    #[test]
    fn test_tracking_uri_empty_is_unset() {
        let mut config = valid_config();
        config.storage.mlflow_tracking_uri = Some(String::new());
        assert!(config.tracking_uri().is_none());
        config.storage.mlflow_tracking_uri = Some("http://mlflow:5000".to_string());
        assert_eq!(config.tracking_uri(), Some("http://mlflow:5000"));
    }

    #[test]
    fn test_load_config_with_overrides() {
        let overrides = valid_config();
        let config = load_config(None, None, Some(&overrides)).unwrap();
        assert_eq!(config.storage.gcs_root_uri, "gs://edgeml-demo-bucket/mlflow");
        assert_eq!(config.segments.len(), 3);
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let err = load_config(None, Some(Path::new("/nonexistent/dualtrain.toml")), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".dualtrain");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("config.toml"),
            r#"
[gcp]
project_id = "taxi-prod"
region = "europe-west1"
zone = "europe-west1-b"

[storage]
gcs_root_uri = "gs://taxi-prod-ml"

[[segments]]
postfix = "training"
range = { start = 0, end = 90 }

[[segments]]
postfix = "eval"
range = { start = 90, end = 100 }
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None, None).unwrap();
        assert_eq!(config.gcp.project_id, "taxi-prod");
        assert_eq!(config.storage.gcs_root_uri, "gs://taxi-prod-ml");
        assert_eq!(config.segments.len(), 2);
        assert_eq!(config.segments[1], SegmentConfig::new("eval", 90, 100));
        config.validate().unwrap();
    }
}
