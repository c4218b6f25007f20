//! Error types for the dualtrain core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering configuration, graph assembly, remote service calls, scheduling
//! and run execution.

use std::path::PathBuf;

/// Top-level error type for dualtrain.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the configuration system. All of these are fatal at assembly time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors raised while assembling or inspecting a task graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Graph has no tasks")]
    Empty,

    #[error("Duplicate task ID: '{id}'")]
    DuplicateTask { id: String },

    #[error("Unknown task: '{id}'")]
    UnknownTask { id: String },

    #[error("Task '{id}' depends on itself")]
    SelfDependency { id: String },

    #[error("Cycle detected at task '{id}'")]
    Cycle { id: String },

    #[error("Branch target '{id}' is not a task of this graph")]
    UnknownBranchTarget { id: String },

    #[error("Invalid segment definition: {message}")]
    InvalidSegments { message: String },
}

/// Errors from calls to external services (catalog, warehouse, storage, job service).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Request to {service} failed: {message}")]
    Transport { service: String, message: String },

    #[error("Authentication failed for {service}: {message}")]
    AuthFailed { service: String, message: String },

    #[error("HTTP {status} from {service}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {service}: {message}")]
    ResponseParse { service: String, message: String },

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("{service} job '{job_id}' failed: {message}")]
    JobFailed {
        service: String,
        job_id: String,
        message: String,
    },
}

/// Errors from schedule evaluation and pipeline registration.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    #[error("Pipeline already registered: {id}")]
    AlreadyRegistered { id: String },

    #[error("Pipeline not found: {id}")]
    NotFound { id: String },
}

/// Errors from the local runner itself (not from the tasks it runs).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Run not found: {run_id}")]
    NotFound { run_id: uuid::Uuid },

    #[error("Failed to persist run state: {message}")]
    Persistence { message: String },
}

/// A type alias for results using the top-level `PipelineError`.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let err = PipelineError::Config(ConfigError::MissingField {
            field: "storage.gcs_root_uri".into(),
        });
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required field: storage.gcs_root_uri"
        );
    }

    #[test]
    fn test_error_display_graph() {
        let err = PipelineError::Graph(GraphError::DuplicateTask {
            id: "split_table_eval".into(),
        });
        assert_eq!(
            err.to_string(),
            "Graph error: Duplicate task ID: 'split_table_eval'"
        );
    }

    #[test]
    fn test_error_display_remote_status() {
        let err = RemoteError::Status {
            service: "bigquery".into(),
            status: 403,
            body: "denied".into(),
        };
        assert_eq!(err.to_string(), "HTTP 403 from bigquery: denied");
    }

    #[test]
    fn test_error_display_job_failed() {
        let err = PipelineError::Remote(RemoteError::JobFailed {
            service: "bigquery".into(),
            job_id: "job_123".into(),
            message: "quota exceeded".into(),
        });
        assert_eq!(
            err.to_string(),
            "Remote call failed: bigquery job 'job_123' failed: quota exceeded"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: PipelineError = serde_err.into();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }
}
