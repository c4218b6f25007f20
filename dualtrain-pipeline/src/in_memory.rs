//! In-memory stand-ins for the warehouse, catalog, object storage and job
//! service. Used by tests and for local dry runs.

use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

use dualtrain_core::RemoteError;

use crate::analyzer::FlexTemplateLaunch;
use crate::services::{CatalogService, ExportJob, JobService, SplitJob, WarehouseService};
use crate::table::TableRef;

/// A table row: column name to rendered value.
pub type Row = BTreeMap<String, String>;

/// Deterministic bucket for `key` in `[0, domain)`.
///
/// Stands in for `MOD(ABS(FARM_FINGERPRINT(key)), domain)`: the first eight
/// bytes of a SHA-256 digest read as a signed integer.
pub fn hash_bucket(key: &str, domain: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    let fingerprint = i64::from_be_bytes(bytes);
    (fingerprint.unsigned_abs() % u64::from(domain.max(1))) as u32
}

/// Warehouse and catalog backed by hash maps, plus the objects exported to
/// storage.
#[derive(Default)]
pub struct InMemoryWarehouse {
    tables: Mutex<HashMap<TableRef, Vec<Row>>>,
    objects: Mutex<BTreeMap<String, String>>,
    failing_tables: Mutex<Vec<TableRef>>,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a table.
    pub async fn insert_table(&self, table: TableRef, rows: Vec<Row>) {
        self.tables.lock().await.insert(table, rows);
    }

    pub async fn rows(&self, table: &TableRef) -> Option<Vec<Row>> {
        self.tables.lock().await.get(table).cloned()
    }

    /// Contents of an exported object.
    pub async fn object(&self, uri: &str) -> Option<String> {
        self.objects.lock().await.get(uri).cloned()
    }

    pub async fn object_uris(&self) -> Vec<String> {
        self.objects.lock().await.keys().cloned().collect()
    }

    /// Make every operation touching `table` fail with a transport error.
    pub async fn fail_on(&self, table: TableRef) {
        self.failing_tables.lock().await.push(table);
    }

    async fn check_failure(&self, table: &TableRef) -> Result<(), RemoteError> {
        if self.failing_tables.lock().await.contains(table) {
            return Err(RemoteError::Transport {
                service: "in-memory warehouse".to_string(),
                message: format!("injected failure for {}", table),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogService for InMemoryWarehouse {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, RemoteError> {
        self.check_failure(table).await?;
        Ok(self.tables.lock().await.contains_key(table))
    }
}

#[async_trait]
impl WarehouseService for InMemoryWarehouse {
    async fn delete_table(
        &self,
        table: &TableRef,
        ignore_if_missing: bool,
    ) -> Result<bool, RemoteError> {
        self.check_failure(table).await?;
        let removed = self.tables.lock().await.remove(table).is_some();
        if !removed && !ignore_if_missing {
            return Err(RemoteError::TableNotFound {
                table: table.to_string(),
            });
        }
        Ok(removed)
    }

    async fn materialize(&self, job: &SplitJob) -> Result<(), RemoteError> {
        self.check_failure(&job.destination).await?;
        let mut tables = self.tables.lock().await;
        // WRITE_EMPTY: an existing destination must not hold data.
        if tables.get(&job.destination).is_some_and(|rows| !rows.is_empty()) {
            return Err(RemoteError::JobFailed {
                service: "in-memory warehouse".to_string(),
                job_id: format!("split-{}", job.destination.table),
                message: format!("Already Exists: Table {}", job.destination),
            });
        }
        let source = tables
            .get(&job.source)
            .ok_or_else(|| RemoteError::TableNotFound {
                table: job.source.to_string(),
            })?;
        let limit = job.limit.map_or(usize::MAX, |l| l as usize);
        let selected: Vec<Row> = source
            .iter()
            .filter(|row| {
                row.get(&job.key)
                    .is_some_and(|key| job.range.contains(hash_bucket(key, job.domain)))
            })
            .take(limit)
            .cloned()
            .collect();
        debug!(destination = %job.destination, rows = selected.len(), "Materialized split");
        tables.insert(job.destination.clone(), selected);
        Ok(())
    }

    async fn export_table(&self, job: &ExportJob) -> Result<(), RemoteError> {
        self.check_failure(&job.source).await?;
        let rows = self
            .tables
            .lock()
            .await
            .get(&job.source)
            .cloned()
            .ok_or_else(|| RemoteError::TableNotFound {
                table: job.source.to_string(),
            })?;
        let csv = render_csv(&rows, job.field_delimiter);
        let mut objects = self.objects.lock().await;
        for uri in &job.destination_uris {
            objects.insert(uri.clone(), csv.clone());
        }
        Ok(())
    }
}

/// Header line plus one line per row, columns in name order.
fn render_csv(rows: &[Row], delimiter: char) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let separator = delimiter.to_string();
    let columns: Vec<&String> = first.keys().collect();
    let mut out = columns
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(&separator);
    out.push('\n');
    for row in rows {
        let line = columns
            .iter()
            .map(|c| row.get(*c).map(String::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(&separator);
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// A flex template launch as received by [`RecordingJobService`].
#[derive(Debug, Clone)]
pub struct RecordedLaunch {
    pub location: String,
    pub project: String,
    pub launch: FlexTemplateLaunch,
}

/// Job service that records launches and answers with a synthetic job.
#[derive(Default)]
pub struct RecordingJobService {
    launches: Mutex<Vec<RecordedLaunch>>,
    failure: Option<String>,
}

impl RecordingJobService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service whose every launch fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub async fn launches(&self) -> Vec<RecordedLaunch> {
        self.launches.lock().await.clone()
    }
}

#[async_trait]
impl JobService for RecordingJobService {
    async fn launch_flex_template(
        &self,
        location: &str,
        project: &str,
        launch: &FlexTemplateLaunch,
    ) -> Result<Value, RemoteError> {
        if let Some(ref message) = self.failure {
            return Err(RemoteError::Status {
                service: "Dataflow".to_string(),
                status: 429,
                body: message.clone(),
            });
        }
        let mut launches = self.launches.lock().await;
        launches.push(RecordedLaunch {
            location: location.to_string(),
            project: project.to_string(),
            launch: launch.clone(),
        });
        Ok(json!({
            "job": {
                "id": format!("local-{}", launches.len()),
                "name": launch.job_name,
                "projectId": project,
                "location": location,
            }
        }))
    }
}
