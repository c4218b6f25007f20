//! REST clients for BigQuery and Dataflow.
//!
//! BigQuery backs [`CatalogService`] and [`WarehouseService`]; Dataflow backs
//! [`JobService`]. Query and extract jobs are polled through `jobs.get`
//! until they report `DONE`. No call is retried.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use dualtrain_core::{PipelineConfig, RemoteError};

use crate::analyzer::FlexTemplateLaunch;
use crate::services::{CatalogService, ExportJob, JobService, SplitJob, WarehouseService};
use crate::table::TableRef;

pub const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2/";
pub const DATAFLOW_BASE_URL: &str = "https://dataflow.googleapis.com/v1b3/";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// Environment variable holding a pre-issued OAuth access token.
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

const BIGQUERY: &str = "BigQuery";
const DATAFLOW: &str = "Dataflow";

/// Where bearer tokens come from.
pub enum TokenSource {
    /// A fixed token.
    Static(String),
    /// The GCE metadata server, with the current token cached until shortly
    /// before it expires.
    Metadata {
        url: String,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

impl TokenSource {
    /// Token from [`ACCESS_TOKEN_ENV`] if set, the metadata server otherwise.
    pub fn from_env() -> Self {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => TokenSource::Static(token.trim().to_string()),
            _ => TokenSource::metadata(METADATA_TOKEN_URL),
        }
    }

    pub fn metadata(url: impl Into<String>) -> Self {
        TokenSource::Metadata {
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn token(&self, http: &reqwest::Client, service: &str) -> Result<String, RemoteError> {
        let (url, cached) = match self {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata { url, cached } => (url, cached),
        };

        let mut cached = cached.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let response = http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| RemoteError::AuthFailed {
                service: service.to_string(),
                message: format!("metadata server unreachable: {}", e),
            })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| RemoteError::AuthFailed {
            service: service.to_string(),
            message: format!("failed to read metadata response: {}", e),
        })?;
        if !status.is_success() {
            return Err(RemoteError::AuthFailed {
                service: service.to_string(),
                message: format!("metadata server returned HTTP {}: {}", status, body),
            });
        }
        let json: Value = serde_json::from_str(&body).map_err(|e| RemoteError::AuthFailed {
            service: service.to_string(),
            message: format!("invalid metadata token response: {}", e),
        })?;
        let token = json["access_token"]
            .as_str()
            .ok_or_else(|| RemoteError::AuthFailed {
                service: service.to_string(),
                message: "metadata token response has no access_token".to_string(),
            })?
            .to_string();
        let lifetime = json["expires_in"].as_u64().unwrap_or(300).saturating_sub(60);
        *cached = Some((token.clone(), Instant::now() + Duration::from_secs(lifetime)));
        Ok(token)
    }
}

fn map_http_error(service: &str, status: reqwest::StatusCode, body: &str) -> RemoteError {
    match status.as_u16() {
        401 | 403 => RemoteError::AuthFailed {
            service: service.to_string(),
            message: body.to_string(),
        },
        code => RemoteError::Status {
            service: service.to_string(),
            status: code,
            body: body.to_string(),
        },
    }
}

fn join_url(base: &Url, path: &str, service: &str) -> Result<Url, RemoteError> {
    base.join(path).map_err(|e| RemoteError::Transport {
        service: service.to_string(),
        message: format!("invalid URL '{}': {}", path, e),
    })
}

fn parse_base_url(base: &str, service: &str) -> Result<Url, RemoteError> {
    let normalized = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };
    Url::parse(&normalized).map_err(|e| RemoteError::Transport {
        service: service.to_string(),
        message: format!("invalid base URL '{}': {}", base, e),
    })
}

fn table_path(table: &TableRef) -> String {
    format!(
        "projects/{}/datasets/{}/tables/{}",
        urlencoding::encode(&table.project),
        urlencoding::encode(&table.dataset),
        urlencoding::encode(&table.table)
    )
}

fn table_reference(table: &TableRef) -> Value {
    json!({
        "projectId": table.project,
        "datasetId": table.dataset,
        "tableId": table.table,
    })
}

/// Outcome of one HTTP exchange: status and raw body.
struct Reply {
    status: reqwest::StatusCode,
    body: String,
}

impl Reply {
    fn json(&self, service: &str) -> Result<Value, RemoteError> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| RemoteError::ResponseParse {
            service: service.to_string(),
            message: format!("Invalid JSON in response: {}", e),
        })
    }
}

async fn send(
    request: reqwest::RequestBuilder,
    token: &str,
    service: &str,
) -> Result<Reply, RemoteError> {
    let response = request
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| RemoteError::Transport {
            service: service.to_string(),
            message: e.to_string(),
        })?;
    let status = response.status();
    let body = response.text().await.map_err(|e| RemoteError::ResponseParse {
        service: service.to_string(),
        message: format!("Failed to read response body: {}", e),
    })?;
    Ok(Reply { status, body })
}

/// BigQuery REST client.
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenSource,
    /// Project that query and extract jobs are billed to.
    project: String,
    poll_interval: Duration,
}

impl BigQueryClient {
    pub fn new(
        http: reqwest::Client,
        tokens: TokenSource,
        project: impl Into<String>,
    ) -> Result<Self, RemoteError> {
        Ok(Self {
            http,
            base_url: parse_base_url(BIGQUERY_BASE_URL, BIGQUERY)?,
            tokens,
            project: project.into(),
            poll_interval: Duration::from_secs(2),
        })
    }

    pub fn from_config(
        http: reqwest::Client,
        tokens: TokenSource,
        config: &PipelineConfig,
    ) -> Result<Self, RemoteError> {
        Ok(Self::new(http, tokens, &config.gcp.project_id)?
            .with_poll_interval(Duration::from_secs(config.warehouse.poll_interval_secs)))
    }

    /// Point the client at another endpoint (emulators, tests).
    pub fn with_base_url(mut self, base: &str) -> Result<Self, RemoteError> {
        self.base_url = parse_base_url(base, BIGQUERY)?;
        Ok(self)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Insert a job and wait for it to finish.
    async fn run_job(&self, configuration: Value, location: Option<&str>) -> Result<Value, RemoteError> {
        let token = self.tokens.token(&self.http, BIGQUERY).await?;
        let url = join_url(
            &self.base_url,
            &format!("projects/{}/jobs", urlencoding::encode(&self.project)),
            BIGQUERY,
        )?;
        let mut body = json!({ "configuration": configuration });
        if let Some(location) = location {
            body["jobReference"] = json!({ "projectId": self.project, "location": location });
        }

        let reply = send(self.http.post(url).json(&body), &token, BIGQUERY).await?;
        if !reply.status.is_success() {
            return Err(map_http_error(BIGQUERY, reply.status, &reply.body));
        }
        let mut job = reply.json(BIGQUERY)?;
        let job_id = job["jobReference"]["jobId"]
            .as_str()
            .ok_or_else(|| RemoteError::ResponseParse {
                service: BIGQUERY.to_string(),
                message: "job response has no jobReference.jobId".to_string(),
            })?
            .to_string();
        let job_location = job["jobReference"]["location"]
            .as_str()
            .map(str::to_string)
            .or_else(|| location.map(str::to_string));
        info!(job_id = job_id.as_str(), "Inserted BigQuery job");

        while job["status"]["state"].as_str() != Some("DONE") {
            tokio::time::sleep(self.poll_interval).await;
            let mut url = join_url(
                &self.base_url,
                &format!(
                    "projects/{}/jobs/{}",
                    urlencoding::encode(&self.project),
                    urlencoding::encode(&job_id)
                ),
                BIGQUERY,
            )?;
            if let Some(ref location) = job_location {
                url.query_pairs_mut().append_pair("location", location);
            }
            let token = self.tokens.token(&self.http, BIGQUERY).await?;
            let reply = send(self.http.get(url), &token, BIGQUERY).await?;
            if !reply.status.is_success() {
                return Err(map_http_error(BIGQUERY, reply.status, &reply.body));
            }
            job = reply.json(BIGQUERY)?;
            debug!(
                job_id = job_id.as_str(),
                state = job["status"]["state"].as_str().unwrap_or("UNKNOWN"),
                "Polled BigQuery job"
            );
        }

        if let Some(error) = job["status"]["errorResult"].as_object() {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            warn!(job_id = job_id.as_str(), error = message.as_str(), "BigQuery job failed");
            return Err(RemoteError::JobFailed {
                service: BIGQUERY.to_string(),
                job_id,
                message,
            });
        }
        Ok(job)
    }
}

#[async_trait]
impl CatalogService for BigQueryClient {
    async fn table_exists(&self, table: &TableRef) -> Result<bool, RemoteError> {
        let token = self.tokens.token(&self.http, BIGQUERY).await?;
        let url = join_url(&self.base_url, &table_path(table), BIGQUERY)?;
        let reply = send(self.http.get(url), &token, BIGQUERY).await?;
        match reply.status.as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(map_http_error(BIGQUERY, reply.status, &reply.body)),
        }
    }
}

#[async_trait]
impl WarehouseService for BigQueryClient {
    async fn delete_table(
        &self,
        table: &TableRef,
        ignore_if_missing: bool,
    ) -> Result<bool, RemoteError> {
        let token = self.tokens.token(&self.http, BIGQUERY).await?;
        let url = join_url(&self.base_url, &table_path(table), BIGQUERY)?;
        let reply = send(self.http.delete(url), &token, BIGQUERY).await?;
        match reply.status.as_u16() {
            200..=299 => {
                info!(table = %table, "Deleted table");
                Ok(true)
            }
            404 if ignore_if_missing => {
                info!(table = %table, "Table already absent");
                Ok(false)
            }
            404 => Err(RemoteError::TableNotFound {
                table: table.to_string(),
            }),
            _ => Err(map_http_error(BIGQUERY, reply.status, &reply.body)),
        }
    }

    async fn materialize(&self, job: &SplitJob) -> Result<(), RemoteError> {
        let configuration = json!({
            "query": {
                "query": job.sql(),
                "useLegacySql": false,
                "destinationTable": table_reference(&job.destination),
                "writeDisposition": "WRITE_EMPTY",
                "createDisposition": "CREATE_IF_NEEDED",
            }
        });
        self.run_job(configuration, Some(&job.location)).await?;
        info!(destination = %job.destination, range = %job.range, "Materialized segment");
        Ok(())
    }

    async fn export_table(&self, job: &ExportJob) -> Result<(), RemoteError> {
        let configuration = json!({
            "extract": {
                "sourceTable": table_reference(&job.source),
                "destinationUris": job.destination_uris,
                "destinationFormat": "CSV",
                "fieldDelimiter": job.field_delimiter.to_string(),
            }
        });
        self.run_job(configuration, None).await?;
        info!(source = %job.source, uris = ?job.destination_uris, "Exported table");
        Ok(())
    }
}

/// Dataflow REST client.
pub struct DataflowClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenSource,
}

impl DataflowClient {
    pub fn new(http: reqwest::Client, tokens: TokenSource) -> Result<Self, RemoteError> {
        Ok(Self {
            http,
            base_url: parse_base_url(DATAFLOW_BASE_URL, DATAFLOW)?,
            tokens,
        })
    }

    pub fn with_base_url(mut self, base: &str) -> Result<Self, RemoteError> {
        self.base_url = parse_base_url(base, DATAFLOW)?;
        Ok(self)
    }
}

#[async_trait]
impl JobService for DataflowClient {
    async fn launch_flex_template(
        &self,
        location: &str,
        project: &str,
        launch: &FlexTemplateLaunch,
    ) -> Result<Value, RemoteError> {
        let token = self.tokens.token(&self.http, DATAFLOW).await?;
        let url = join_url(
            &self.base_url,
            &format!(
                "projects/{}/locations/{}/flexTemplates:launch",
                urlencoding::encode(project),
                urlencoding::encode(location)
            ),
            DATAFLOW,
        )?;
        let body = json!({ "launchParameter": launch });
        debug!(url = url.as_str(), job_name = launch.job_name.as_str(), "Sending flex template launch");

        let reply = send(self.http.post(url).json(&body), &token, DATAFLOW).await?;
        if !reply.status.is_success() {
            return Err(map_http_error(DATAFLOW, reply.status, &reply.body));
        }
        reply.json(DATAFLOW)
    }
}
