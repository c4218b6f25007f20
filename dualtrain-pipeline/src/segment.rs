//! Dataset segments and their hash-bucket ranges.
//!
//! Rows are assigned to buckets by `MOD(ABS(FARM_FINGERPRINT(key)), domain)`.
//! Each segment owns a half-open range of buckets; together the ranges must
//! partition `[0, domain)` with no gaps and no overlap.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use dualtrain_core::{GraphError, PipelineConfig};

use crate::table::TableRef;

/// A half-open range `[start, end)` of hash buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHashRange")]
pub struct HashRange {
    pub start: u32,
    pub end: u32,
}

#[derive(Deserialize)]
struct RawHashRange {
    start: u32,
    end: u32,
}

impl TryFrom<RawHashRange> for HashRange {
    type Error = GraphError;

    fn try_from(raw: RawHashRange) -> Result<Self, Self::Error> {
        HashRange::new(raw.start, raw.end)
    }
}

impl HashRange {
    pub fn new(start: u32, end: u32) -> Result<Self, GraphError> {
        if start >= end {
            return Err(GraphError::InvalidSegments {
                message: format!("range [{}, {}) is empty", start, end),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, bucket: u32) -> bool {
        self.start <= bucket && bucket < self.end
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// SQL condition selecting rows of `key` whose bucket falls in this range.
    ///
    /// `BETWEEN` is inclusive on both ends, so the upper bound is `end - 1`.
    pub fn predicate(&self, key: &str, domain: u32) -> String {
        format!(
            "MOD(ABS(FARM_FINGERPRINT({})), {}) BETWEEN {} AND {}",
            key,
            domain,
            self.start,
            self.end - 1
        )
    }
}

impl fmt::Display for HashRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// One named slice of the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub postfix: String,
    pub range: HashRange,
    /// Destination table: `<project>.<dataset>.<table>_<postfix>`.
    pub table: TableRef,
    /// Export destination: `<dataset root>/ds_<postfix>.csv`.
    pub export_uri: String,
}

/// The validated set of segments for one pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSet {
    domain: u32,
    segments: Vec<Segment>,
}

impl SegmentSet {
    /// Build the segments from configuration, checking that they partition
    /// the hash domain.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, GraphError> {
        let domain = config.warehouse.hash_buckets;
        let dataset_root = config.dataset_root();
        let mut segments = Vec::with_capacity(config.segments.len());
        for segment in &config.segments {
            let range = HashRange::new(segment.range.start, segment.range.end)?;
            segments.push(Segment {
                postfix: segment.postfix.clone(),
                range,
                table: TableRef::new(
                    &config.gcp.project_id,
                    &config.warehouse.dataset,
                    format!("{}_{}", config.warehouse.table, segment.postfix),
                ),
                export_uri: format!("{}/ds_{}.csv", dataset_root, segment.postfix),
            });
        }
        Self::new(domain, segments)
    }

    /// Check a list of segments against a domain of `domain` buckets.
    pub fn new(domain: u32, segments: Vec<Segment>) -> Result<Self, GraphError> {
        if segments.is_empty() {
            return Err(GraphError::InvalidSegments {
                message: "at least one segment is required".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for segment in &segments {
            if !seen.insert(segment.postfix.as_str()) {
                return Err(GraphError::InvalidSegments {
                    message: format!("duplicate segment '{}'", segment.postfix),
                });
            }
        }

        let mut ranges: Vec<(HashRange, &str)> = segments
            .iter()
            .map(|s| (s.range, s.postfix.as_str()))
            .collect();
        ranges.sort_by_key(|(range, _)| range.start);

        let mut next = 0;
        for (range, postfix) in &ranges {
            if range.start < next {
                return Err(GraphError::InvalidSegments {
                    message: format!("segment '{}' {} overlaps its predecessor", postfix, range),
                });
            }
            if range.start > next {
                return Err(GraphError::InvalidSegments {
                    message: format!("buckets [{}, {}) are not covered", next, range.start),
                });
            }
            next = range.end;
        }
        if next != domain {
            return Err(GraphError::InvalidSegments {
                message: format!(
                    "segments cover [0, {}) but the hash domain is [0, {})",
                    next, domain
                ),
            });
        }

        Ok(Self { domain, segments })
    }

    pub fn domain(&self) -> u32 {
        self.domain
    }

    /// Segments in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, postfix: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.postfix == postfix)
    }

    /// The segment owning `bucket`, if the bucket is inside the domain.
    pub fn segment_for_bucket(&self, bucket: u32) -> Option<&Segment> {
        self.segments.iter().find(|s| s.range.contains(bucket))
    }
}
