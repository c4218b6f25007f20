//! CLI subcommand handlers.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use dualtrain_core::{LocalRunner, PipelineConfig, RunContext, RunState, RunStatus};
use dualtrain_pipeline::gcp::{BigQueryClient, DataflowClient, TokenSource};
use dualtrain_pipeline::{
    AnalyzerLauncher, AnalyzerRequest, PIPELINE_ID, PipelineTaskExecutor, TableRef, assemble,
    check_table_exists,
};

use crate::{Commands, ConfigAction, GraphFormat};

/// Handle a CLI subcommand.
pub(crate) async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_file),
        Commands::Graph { format } => {
            let config = load_validated(workspace, config_file)?;
            handle_graph(&config, format)
        }
        Commands::Run {
            baseline,
            logical_date,
            run_id,
        } => {
            let mut config = load_validated(workspace, config_file)?;
            if baseline.is_some() {
                config.analyzer.baseline_stats_uri = baseline;
            }
            handle_run(&config, logical_date, run_id).await
        }
        Commands::CheckTable { table } => {
            let config = load_validated(workspace, config_file)?;
            handle_check_table(&config, &table).await
        }
        Commands::LaunchAnalyzer { baseline } => {
            let config = load_validated(workspace, config_file)?;
            handle_launch_analyzer(&config, baseline).await
        }
        Commands::Schedule { last_run, now } => {
            let config = load_validated(workspace, config_file)?;
            handle_schedule(&config, last_run, now.unwrap_or_else(Utc::now))
        }
        Commands::Status { run_id } => {
            let config = load_config(workspace, config_file)?;
            handle_status(&config, run_id)
        }
    }
}

fn load_config(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    dualtrain_core::load_config(Some(workspace), config_file, None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn load_validated(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = load_config(workspace, config_file)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    Ok(config)
}

/// Directory holding persisted run state.
fn state_dir(config: &PipelineConfig) -> PathBuf {
    config.runner.state_dir.clone().unwrap_or_else(|| {
        dualtrain_core::config::data_dir()
            .map(|d| d.join("runs"))
            .unwrap_or_else(|| PathBuf::from(".dualtrain/runs"))
    })
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".dualtrain");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&PipelineConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            println!("Set storage.gcs_root_uri (or MLFLOW_GCS_ROOT_URI) before running.");
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(workspace, config_file)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Check => {
            load_validated(workspace, config_file)?;
            println!("Configuration is valid.");
            Ok(())
        }
    }
}

fn handle_graph(config: &PipelineConfig, format: GraphFormat) -> anyhow::Result<()> {
    let definition = assemble(config)?;
    match format {
        GraphFormat::Dot => print!("{}", definition.to_dot()),
        GraphFormat::Json => println!("{}", serde_json::to_string_pretty(&definition.summary())?),
    }
    Ok(())
}

fn http_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(concat!("dualtrain/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

fn analyzer_launcher(config: &PipelineConfig, http: reqwest::Client) -> anyhow::Result<AnalyzerLauncher> {
    let dataflow = DataflowClient::new(http, TokenSource::from_env())?;
    Ok(AnalyzerLauncher::from_config(Arc::new(dataflow), config))
}

async fn handle_run(
    config: &PipelineConfig,
    logical_date: Option<DateTime<Utc>>,
    run_id: Option<Uuid>,
) -> anyhow::Result<()> {
    let definition = assemble(config)?;
    let http = http_client()?;
    let warehouse = BigQueryClient::from_config(http.clone(), TokenSource::from_env(), config)?;
    let launcher = analyzer_launcher(config, http)?;
    let executor = PipelineTaskExecutor::new(Arc::new(warehouse), launcher);
    let runner = LocalRunner::new(Arc::new(executor))
        .with_max_parallel(config.runner.max_parallel_tasks)
        .with_state_dir(state_dir(config));

    let mut ctx = RunContext::new(&definition.id, logical_date.unwrap_or_else(Utc::now));
    if let Some(run_id) = run_id {
        ctx = ctx.with_run_id(run_id);
    }
    let state = runner.run(&definition.graph, ctx).await?;
    print_run(&state);

    if state.status == RunStatus::Failed {
        anyhow::bail!("Run {} failed", state.run_id);
    }
    Ok(())
}

async fn handle_check_table(config: &PipelineConfig, table: &str) -> anyhow::Result<()> {
    let table: TableRef = table.parse()?;
    let catalog = BigQueryClient::from_config(http_client()?, TokenSource::from_env(), config)?;
    let existence = check_table_exists(&catalog, &table).await?;
    println!("{}: {}", table, existence);
    Ok(())
}

async fn handle_launch_analyzer(
    config: &PipelineConfig,
    baseline: Option<String>,
) -> anyhow::Result<()> {
    let mut request = AnalyzerRequest::from_config(config)?;
    if let Some(baseline) = baseline {
        request = request.with_baseline(baseline);
    }
    let launcher = analyzer_launcher(config, http_client()?)?;
    let ctx = RunContext::new(PIPELINE_ID, Utc::now());
    let response = launcher.launch(&ctx, &request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn handle_schedule(
    config: &PipelineConfig,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let spec = config.schedule.to_spec()?;
    println!(
        "Schedule: {} from {} (catchup: {})",
        spec.recurrence,
        spec.start_date.to_rfc3339(),
        spec.catchup
    );
    let due = spec.due_runs(last_run, now)?;
    if due.is_empty() {
        println!("No runs due.");
    } else {
        for logical_date in &due {
            println!("  due: {}", logical_date.to_rfc3339());
        }
    }
    match spec.next_after(now)? {
        Some(next) => println!("Next: {}", next.to_rfc3339()),
        None => println!("Next: none"),
    }
    Ok(())
}

fn handle_status(config: &PipelineConfig, run_id: Uuid) -> anyhow::Result<()> {
    let state = LocalRunner::<dualtrain_pipeline::PipelineTask>::load_state(&state_dir(config), run_id)?;
    print_run(&state);
    Ok(())
}

fn print_run(state: &RunState) {
    println!("Run {} ({}): {}", state.run_id, state.pipeline_id, state.status);
    for id in &state.start_order {
        if let Some(record) = state.tasks.get(id) {
            println!("  {:<28} {}", id.as_str(), record.status);
            if let Some(ref error) = record.error {
                println!("    error: {}", error);
            }
        }
    }
    for (id, record) in &state.tasks {
        if !state.start_order.contains(id) {
            println!("  {:<28} {}", id.as_str(), record.status);
        }
    }
}
