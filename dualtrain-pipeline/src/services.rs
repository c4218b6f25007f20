//! Interfaces of the managed services the pipeline calls.
//!
//! The pipeline never talks to a concrete backend directly: GCP REST clients
//! live in [`crate::gcp`] and in-memory stand-ins in [`crate::in_memory`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dualtrain_core::RemoteError;

use crate::analyzer::FlexTemplateLaunch;
use crate::queries;
use crate::segment::HashRange;
use crate::table::TableRef;

/// Materialize one hash range of a source table into a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitJob {
    pub source: TableRef,
    pub destination: TableRef,
    /// Column hashed to pick rows.
    pub key: String,
    pub domain: u32,
    pub range: HashRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Location the query job runs in.
    pub location: String,
}

impl SplitJob {
    /// Standard SQL run by the warehouse for this split.
    pub fn sql(&self) -> String {
        queries::split_query(&self.source, &self.key, self.domain, &self.range, self.limit)
    }
}

/// Export a table as delimited CSV to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub source: TableRef,
    pub destination_uris: Vec<String>,
    pub field_delimiter: char,
}

/// Table metadata lookups.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Whether `table` currently exists. Not cached.
    async fn table_exists(&self, table: &TableRef) -> Result<bool, RemoteError>;
}

/// Warehouse table operations.
#[async_trait]
pub trait WarehouseService: Send + Sync {
    /// Delete `table`. Returns whether a table was actually removed.
    ///
    /// A missing table is an error only when `ignore_if_missing` is false.
    async fn delete_table(
        &self,
        table: &TableRef,
        ignore_if_missing: bool,
    ) -> Result<bool, RemoteError>;

    /// Run the split query and write its result to the destination table.
    async fn materialize(&self, job: &SplitJob) -> Result<(), RemoteError>;

    /// Export a table to object storage.
    async fn export_table(&self, job: &ExportJob) -> Result<(), RemoteError>;
}

/// Submission of templated batch jobs.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Launch a flex template. The response is returned as-is.
    async fn launch_flex_template(
        &self,
        location: &str,
        project: &str,
        launch: &FlexTemplateLaunch,
    ) -> Result<Value, RemoteError>;
}
