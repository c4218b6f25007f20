//! End-to-end runs of the assembled pipeline against in-memory services.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use pretty_assertions::assert_eq;

use dualtrain_core::{LocalRunner, PipelineConfig, RunContext, RunStatus, TaskStatus};
use dualtrain_pipeline::in_memory::{InMemoryWarehouse, RecordingJobService, Row, hash_bucket};
use dualtrain_pipeline::{
    ANALYZER_TASK_ID, AnalyzerLauncher, PipelineDefinition, PipelineTaskExecutor, TableRef,
    assemble,
};

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.storage.gcs_root_uri = "gs://bucket/mlflow".to_string();
    config
}

/// One row per hash bucket, so every bucket of the domain is populated once.
fn one_row_per_bucket(domain: u32) -> Vec<Row> {
    let mut by_bucket: BTreeMap<u32, Row> = BTreeMap::new();
    let mut i = 0u64;
    while by_bucket.len() < domain as usize {
        let key = format!("trip-{}", i);
        by_bucket.entry(hash_bucket(&key, domain)).or_insert_with(|| {
            Row::from([
                ("unique_key".to_string(), key.clone()),
                ("fare".to_string(), format!("{}.25", i % 40)),
            ])
        });
        i += 1;
    }
    by_bucket.into_values().collect()
}

struct Harness {
    definition: PipelineDefinition,
    warehouse: Arc<InMemoryWarehouse>,
    jobs: Arc<RecordingJobService>,
    runner: LocalRunner<dualtrain_pipeline::PipelineTask>,
}

async fn harness(jobs: RecordingJobService) -> Harness {
    let config = config();
    let definition = assemble(&config).unwrap();
    let warehouse = Arc::new(InMemoryWarehouse::new());
    let source: TableRef = config.warehouse.source_table.parse().unwrap();
    warehouse
        .insert_table(source, one_row_per_bucket(config.warehouse.hash_buckets))
        .await;
    let jobs = Arc::new(jobs);
    let launcher = AnalyzerLauncher::from_config(jobs.clone(), &config);
    let executor = PipelineTaskExecutor::new(warehouse.clone(), launcher);
    let runner = LocalRunner::new(Arc::new(executor)).with_max_parallel(3);
    Harness {
        definition,
        warehouse,
        jobs,
        runner,
    }
}

#[tokio::test]
async fn test_segments_receive_exactly_their_buckets() {
    let h = harness(RecordingJobService::new()).await;
    let ctx = RunContext::new(&h.definition.id, Utc::now());
    let state = h.runner.run(&h.definition.graph, ctx).await.unwrap();
    assert_eq!(state.status, RunStatus::Succeeded);

    let mut seen = HashSet::new();
    let mut total = 0;
    for segment in h.definition.segments.iter() {
        let rows = h.warehouse.rows(&segment.table).await.unwrap();
        assert_eq!(rows.len() as u32, segment.range.len(), "{}", segment.postfix);
        for row in &rows {
            let key = &row["unique_key"];
            assert!(segment.range.contains(hash_bucket(key, 100)));
            assert!(seen.insert(key.clone()), "{} in two segments", key);
        }
        total += rows.len();

        let csv = h.warehouse.object(&segment.export_uri).await.unwrap();
        assert_eq!(csv.lines().count(), rows.len() + 1);
        assert_eq!(csv.lines().next(), Some("fare|unique_key"));
    }
    assert_eq!(total, 100);
}

#[tokio::test]
async fn test_analyzer_launched_once_before_chains() {
    let h = harness(RecordingJobService::new()).await;
    let ctx = RunContext::new(&h.definition.id, Utc::now());
    let run_token = ctx.run_token();
    let state = h.runner.run(&h.definition.graph, ctx).await.unwrap();

    let launches = h.jobs.launches().await;
    assert_eq!(launches.len(), 1);
    assert!(launches[0].launch.job_name.starts_with("analyzer-"));
    assert!(launches[0].launch.job_name.ends_with(&run_token));
    assert!(launches[0].launch.parameters.baseline_stats_file.is_none());

    assert_eq!(state.start_order[0].as_str(), ANALYZER_TASK_ID);
    let analyzer = state.task(ANALYZER_TASK_ID).unwrap();
    assert!(analyzer.output.as_ref().unwrap()["job"]["id"].is_string());
}

#[tokio::test]
async fn test_export_waits_for_its_split() {
    let h = harness(RecordingJobService::new()).await;
    let ctx = RunContext::new(&h.definition.id, Utc::now());
    let state = h.runner.run(&h.definition.graph, ctx).await.unwrap();

    for chain in &h.definition.chains {
        let delete = state.task(chain.delete.id().as_str()).unwrap();
        let split = state.task(chain.split.id().as_str()).unwrap();
        let export = state.task(chain.export.id().as_str()).unwrap();
        assert_eq!(split.status, TaskStatus::Succeeded);
        assert!(delete.finished_at.unwrap() <= split.started_at.unwrap());
        assert!(split.finished_at.unwrap() <= export.started_at.unwrap());
        assert!(
            state.start_position(chain.split.id().as_str())
                < state.start_position(chain.export.id().as_str())
        );
    }
}

#[tokio::test]
async fn test_rerun_replaces_destinations() {
    let h = harness(RecordingJobService::new()).await;
    for _ in 0..2 {
        let ctx = RunContext::new(&h.definition.id, Utc::now());
        let state = h.runner.run(&h.definition.graph, ctx).await.unwrap();
        assert_eq!(state.status, RunStatus::Succeeded);
    }
    let training = h.definition.segments.get("training").unwrap();
    assert_eq!(h.warehouse.rows(&training.table).await.unwrap().len(), 80);
    assert_eq!(h.jobs.launches().await.len(), 2);
}

#[tokio::test]
async fn test_launch_failure_stops_every_chain() {
    let h = harness(RecordingJobService::failing("template not found")).await;
    let ctx = RunContext::new(&h.definition.id, Utc::now());
    let state = h.runner.run(&h.definition.graph, ctx).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.task(ANALYZER_TASK_ID).unwrap().status, TaskStatus::Failed);
    assert_eq!(state.tasks_with_status(TaskStatus::UpstreamFailed).len(), 9);
    assert!(h.warehouse.object_uris().await.is_empty());
}

#[tokio::test]
async fn test_split_failure_is_confined_to_its_chain() {
    let h = harness(RecordingJobService::new()).await;
    let eval = h.definition.segments.get("eval").unwrap().table.clone();
    h.warehouse.fail_on(eval).await;

    let ctx = RunContext::new(&h.definition.id, Utc::now());
    let state = h.runner.run(&h.definition.graph, ctx).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(state.task("delete_table_eval").unwrap().status, TaskStatus::Failed);
    assert_eq!(
        state.task("split_table_eval").unwrap().status,
        TaskStatus::UpstreamFailed
    );
    assert_eq!(
        state.task("extract_to_gcs_training").unwrap().status,
        TaskStatus::Succeeded
    );
    assert_eq!(
        state.task("extract_to_gcs_validation").unwrap().status,
        TaskStatus::Succeeded
    );
}

#[tokio::test]
async fn test_run_state_persisted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let h = harness(RecordingJobService::new()).await;
    let runner = h.runner.with_state_dir(temp_dir.path());
    let ctx = RunContext::new(&h.definition.id, Utc::now());
    let state = runner.run(&h.definition.graph, ctx).await.unwrap();

    let loaded = LocalRunner::<dualtrain_pipeline::PipelineTask>::load_state(
        temp_dir.path(),
        state.run_id,
    )
    .unwrap();
    assert_eq!(loaded.status, RunStatus::Succeeded);
    assert_eq!(loaded.start_order, state.start_order);
}
