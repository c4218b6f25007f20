//! Per-segment delete → split → export chains.

use dualtrain_core::{GraphError, PipelineConfig, TaskGraph, TaskRef};

use crate::segment::{Segment, SegmentSet};
use crate::services::{ExportJob, SplitJob};
use crate::table::TableRef;
use crate::tasks::PipelineTask;

/// Task handles of one segment's chain.
#[derive(Debug, Clone)]
pub struct SegmentChain {
    pub postfix: String,
    pub delete: TaskRef,
    pub split: TaskRef,
    pub export: TaskRef,
}

pub fn delete_task_id(postfix: &str) -> String {
    format!("delete_table_{}", postfix)
}

pub fn split_task_id(postfix: &str) -> String {
    format!("split_table_{}", postfix)
}

pub fn export_task_id(postfix: &str) -> String {
    format!("extract_to_gcs_{}", postfix)
}

/// Settings shared by every chain.
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub source: TableRef,
    pub key: String,
    pub row_limit: Option<u64>,
    pub location: String,
    pub field_delimiter: char,
}

impl ChainSettings {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, dualtrain_core::ConfigError> {
        Ok(Self {
            source: config.warehouse.source_table.parse()?,
            key: config.warehouse.row_key.clone(),
            row_limit: config.warehouse.split_row_limit,
            location: config.gcp.region.clone(),
            field_delimiter: config.warehouse.field_delimiter,
        })
    }
}

/// Add one chain for `segment`, gated on `upstream`.
pub fn add_segment_chain(
    graph: &mut TaskGraph<PipelineTask>,
    upstream: &TaskRef,
    segment: &Segment,
    domain: u32,
    settings: &ChainSettings,
) -> Result<SegmentChain, GraphError> {
    let delete = graph.add_task(
        delete_task_id(&segment.postfix),
        PipelineTask::DeleteTable {
            table: segment.table.clone(),
        },
    )?;
    let split = graph.add_task(
        split_task_id(&segment.postfix),
        PipelineTask::SplitTable(SplitJob {
            source: settings.source.clone(),
            destination: segment.table.clone(),
            key: settings.key.clone(),
            domain,
            range: segment.range,
            limit: settings.row_limit,
            location: settings.location.clone(),
        }),
    )?;
    let export = graph.add_task(
        export_task_id(&segment.postfix),
        PipelineTask::ExportTable(ExportJob {
            source: segment.table.clone(),
            destination_uris: vec![segment.export_uri.clone()],
            field_delimiter: settings.field_delimiter,
        }),
    )?;
    graph.chain(&[upstream.clone(), delete.clone(), split.clone(), export.clone()])?;

    Ok(SegmentChain {
        postfix: segment.postfix.clone(),
        delete,
        split,
        export,
    })
}

/// Add a chain for every segment, all behind `upstream` and independent of
/// each other.
pub fn add_segment_chains(
    graph: &mut TaskGraph<PipelineTask>,
    upstream: &TaskRef,
    segments: &SegmentSet,
    settings: &ChainSettings,
) -> Result<Vec<SegmentChain>, GraphError> {
    segments
        .iter()
        .map(|segment| add_segment_chain(graph, upstream, segment, segments.domain(), settings))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.storage.gcs_root_uri = "gs://bucket/root".to_string();
        config
    }

    fn build() -> (TaskGraph<PipelineTask>, Vec<SegmentChain>) {
        let config = config();
        let mut graph = TaskGraph::new();
        let upstream = graph
            .add_task(
                "upstream",
                PipelineTask::DeleteTable {
                    table: TableRef::new("p", "d", "t"),
                },
            )
            .unwrap();
        let segments = SegmentSet::from_config(&config).unwrap();
        let settings = ChainSettings::from_config(&config).unwrap();
        let chains = add_segment_chains(&mut graph, &upstream, &segments, &settings).unwrap();
        (graph, chains)
    }

    #[test]
    fn test_chain_shape() {
        let (graph, chains) = build();
        assert_eq!(graph.len(), 10);
        assert_eq!(chains.len(), 3);
        assert_eq!(graph.downstream_of("upstream").len(), 3);
        assert_eq!(
            graph.upstream_of("extract_to_gcs_training"),
            vec![&dualtrain_core::TaskId::from("split_table_training")]
        );
        assert_eq!(
            graph.upstream_of("split_table_training"),
            vec![&dualtrain_core::TaskId::from("delete_table_training")]
        );
    }

    #[test]
    fn test_no_edges_across_chains() {
        let (graph, _) = build();
        assert!(!graph.precedes("split_table_training", "extract_to_gcs_eval"));
        assert!(!graph.precedes("delete_table_eval", "split_table_validation"));
    }

    #[test]
    fn test_chain_tasks_carry_segment_parameters() {
        let (graph, _) = build();
        match &graph.get("split_table_eval").unwrap().task {
            PipelineTask::SplitTable(job) => {
                assert_eq!(job.destination.table, "taxi_trips_eval");
                assert!(job.sql().contains("BETWEEN 80 AND 94"));
                assert_eq!(job.location, "us-central");
            }
            other => panic!("unexpected task {:?}", other),
        }
        match &graph.get("extract_to_gcs_validation").unwrap().task {
            PipelineTask::ExportTable(job) => {
                assert_eq!(job.destination_uris, vec!["gs://bucket/root/data/ds_validation.csv"]);
                assert_eq!(job.field_delimiter, '|');
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_chain_rejected() {
        let config = config();
        let (mut graph, _) = build();
        let upstream = graph.task_ref("upstream").unwrap();
        let segments = SegmentSet::from_config(&config).unwrap();
        let settings = ChainSettings::from_config(&config).unwrap();
        let segment = segments.get("eval").unwrap();
        let err = add_segment_chain(&mut graph, &upstream, segment, 100, &settings).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTask { .. }));
    }
}
