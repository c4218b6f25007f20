//! dualtrain CLI: inspect, schedule and run the dual-trainer data pipeline.

mod commands;

use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use uuid::Uuid;

/// dualtrain: statistics, split and export pipeline ahead of dual model training
#[derive(Parser, Debug)]
#[command(name = "dualtrain", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Print the assembled task graph
    Graph {
        /// Output format
        #[arg(long, value_enum, default_value_t = GraphFormat::Dot)]
        format: GraphFormat,
    },
    /// Execute one run of the pipeline against BigQuery and Dataflow
    Run {
        /// Baseline statistics to validate against
        #[arg(long)]
        baseline: Option<String>,
        /// Logical date of the run (defaults to now)
        #[arg(long)]
        logical_date: Option<DateTime<Utc>>,
        /// Run ID handed out by an external scheduler
        #[arg(long)]
        run_id: Option<Uuid>,
    },
    /// Check whether a table exists
    CheckTable {
        /// Table as project.dataset.table
        table: String,
    },
    /// Launch only the analyzer job
    LaunchAnalyzer {
        /// Baseline statistics to validate against
        #[arg(long)]
        baseline: Option<String>,
    },
    /// Show the runs due under the configured schedule
    Schedule {
        /// Logical date of the last completed run
        #[arg(long)]
        last_run: Option<DateTime<Utc>>,
        /// Evaluate at this instant instead of now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Show a persisted run
    Status {
        /// Run ID
        run_id: Uuid,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a default configuration file into the workspace
    Init,
    /// Print the effective configuration as TOML
    Show,
    /// Validate the effective configuration
    Check,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GraphFormat {
    Dot,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = dualtrain_core::config::data_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "dualtrain.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
