//! Property-based tests for segment partitioning and launch payloads.

use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;

use dualtrain_core::{PipelineConfig, RunContext, SegmentConfig};
use dualtrain_pipeline::in_memory::RecordingJobService;
use dualtrain_pipeline::{AnalyzerLauncher, AnalyzerRequest, SegmentSet};

fn config_with_cuts(domain: u32, cuts: &[u32]) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.storage.gcs_root_uri = "gs://bucket/root".to_string();
    config.warehouse.hash_buckets = domain;
    let mut bounds: Vec<u32> = cuts.iter().map(|c| c % domain).filter(|c| *c > 0).collect();
    bounds.push(0);
    bounds.push(domain);
    bounds.sort_unstable();
    bounds.dedup();
    config.segments = bounds
        .windows(2)
        .enumerate()
        .map(|(i, w)| SegmentConfig::new(format!("s{}", i), w[0], w[1]))
        .collect();
    config
}

// --- Segment partition properties ---

proptest! {
    #[test]
    fn contiguous_segments_partition_the_domain(
        domain in 1u32..500,
        cuts in prop::collection::vec(0u32..500, 0..6),
    ) {
        let config = config_with_cuts(domain, &cuts);
        let set = SegmentSet::from_config(&config).unwrap();
        for bucket in 0..domain {
            let owners = set.iter().filter(|s| s.range.contains(bucket)).count();
            prop_assert_eq!(owners, 1);
        }
        let covered: u32 = set.iter().map(|s| s.range.len()).sum();
        prop_assert_eq!(covered, domain);
    }

    #[test]
    fn shifted_boundary_is_rejected(
        domain in 10u32..200,
        cut in 1u32..9,
        shift in prop_oneof![Just(-1i64), Just(1i64)],
    ) {
        let mut config = config_with_cuts(domain, &[cut]);
        let moved = (i64::from(config.segments[1].range.start) + shift) as u32;
        config.segments[1].range.start = moved;
        prop_assert!(SegmentSet::from_config(&config).is_err());
    }

    #[test]
    fn predicate_bounds_match_range(domain in 2u32..1000, a in any::<u32>(), b in any::<u32>()) {
        let start = a % domain;
        let len = 1 + b % (domain - start);
        let range = dualtrain_pipeline::HashRange::new(start, start + len).unwrap();
        let predicate = range.predicate("unique_key", domain);
        let expected_tail = format!("BETWEEN {} AND {}", start, start + len - 1);
        prop_assert!(predicate.ends_with(&expected_tail));
    }
}

// --- Launch payload properties ---

proptest! {
    #[test]
    fn baseline_key_present_iff_non_blank(baseline in proptest::option::of("[ a-z/:._]{0,24}")) {
        let mut config = PipelineConfig::default();
        config.storage.gcs_root_uri = "gs://bucket/root".to_string();
        config.analyzer.baseline_stats_uri = baseline.clone();
        let launcher = AnalyzerLauncher::from_config(Arc::new(RecordingJobService::new()), &config);
        let request = AnalyzerRequest::from_config(&config).unwrap();
        let ctx = RunContext::new("p", Utc::now());
        let json = serde_json::to_value(launcher.build_launch(&ctx, &request)).unwrap();

        let expected = baseline
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty());
        match expected {
            Some(value) => prop_assert_eq!(json["parameters"]["baseline_stats_file"].as_str(), Some(value)),
            None => prop_assert!(json["parameters"].get("baseline_stats_file").is_none()),
        }
        prop_assert_eq!(
            json["parameters"]["schema_file"].as_str(),
            Some("gs://bucket/root/data/taxi_schema.pbtxt")
        );
    }
}
