//! SQL text for the analyzer sample and the per-segment splits.

use crate::segment::HashRange;
use crate::table::TableRef;

/// Columns of the taxi trips table carried into every query.
pub const TAXI_COLUMNS: &[&str] = &[
    "unique_key",
    "taxi_id",
    "trip_start_timestamp",
    "trip_end_timestamp",
    "trip_seconds",
    "trip_miles",
    "pickup_census_tract",
    "dropoff_census_tract",
    "pickup_community_area",
    "dropoff_community_area",
    "fare",
    "tips",
    "tolls",
    "extras",
    "trip_total",
    "payment_type",
    "company",
    "pickup_latitude",
    "pickup_longitude",
    "pickup_location",
    "dropoff_latitude",
    "dropoff_longitude",
    "dropoff_location",
];

fn select_clause() -> String {
    TAXI_COLUMNS.join(", ")
}

/// Query that materializes one segment of `source` into its destination table.
pub fn split_query(
    source: &TableRef,
    key: &str,
    domain: u32,
    range: &HashRange,
    limit: Option<u64>,
) -> String {
    let mut sql = format!(
        "SELECT {}\nFROM {}\nWHERE\n  {}",
        select_clause(),
        source.quoted(),
        range.predicate(key, domain)
    );
    if let Some(limit) = limit {
        sql.push_str(&format!("\nLIMIT {}", limit));
    }
    sql
}

/// Query handed to the statistics job: a deterministic sample of the source.
pub fn analyzer_query(
    source: &TableRef,
    key: &str,
    domain: u32,
    sample: &HashRange,
    limit: u64,
) -> String {
    format!(
        "SELECT {}\nFROM {}\nWHERE {}\nLIMIT {}",
        select_clause(),
        source.quoted(),
        sample.predicate(key, domain),
        limit
    )
}
