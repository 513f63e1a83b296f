use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;

use weft_config::{EngineSettings, WorkflowDefinition, normalize};
use weft_engine::ExecutionCoordinator;
use weft_executor::{ExecutorRegistry, mock};
use weft_plan::{GraphCompiler, PlanValidator};
use weft_store::{SqliteStore, Store};

/// Weft - a dataflow workflow orchestration engine
#[derive(Parser)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
struct Cli {
  /// SQLite database URL for run history
  #[arg(long, global = true, default_value = "sqlite://weft.db?mode=rwc")]
  db: String,

  /// Engine settings file (JSON), overlaying the defaults
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile and validate a workflow file without running it
  Validate {
    /// Path to the workflow file (JSON, workflow or canvas shape)
    workflow_file: PathBuf,
  },

  /// Run a workflow file to completion
  Run {
    /// Path to the workflow file (JSON, workflow or canvas shape)
    workflow_file: PathBuf,

    /// Execution mode recorded on the run (opaque to the engine)
    #[arg(long, default_value = "parallel")]
    mode: String,
  },

  /// Show a run and its node executions
  History {
    /// The execution ID to inspect
    execution_id: String,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let settings = load_settings(cli.config.as_deref())?;

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async move {
    match cli.command {
      Commands::Validate { workflow_file } => validate(&workflow_file, settings).await,
      Commands::Run {
        workflow_file,
        mode,
      } => run(&workflow_file, &mode, &cli.db, settings).await,
      Commands::History { execution_id } => history(&execution_id, &cli.db).await,
    }
  })
}

fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
  match path {
    Some(path) => {
      let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file: {}", path.display()))?;
      serde_json::from_str(&content)
        .with_context(|| format!("failed to parse settings file: {}", path.display()))
    }
    None => Ok(EngineSettings::default()),
  }
}

async fn read_payload(workflow_file: &Path) -> Result<serde_json::Value> {
  let content = tokio::fs::read_to_string(workflow_file)
    .await
    .with_context(|| format!("failed to read workflow file: {}", workflow_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse workflow file: {}", workflow_file.display()))
}

async fn validate(workflow_file: &Path, settings: EngineSettings) -> Result<()> {
  let payload = read_payload(workflow_file).await?;
  let registry = demo_registry();

  let normalized = normalize::normalize_payload(payload);
  let workflow = normalize::workflow_object(&normalized)
    .context("payload matches neither the workflow nor the canvas shape")?;
  let definition: WorkflowDefinition =
    serde_json::from_value(workflow.clone()).context("failed to deserialize workflow")?;

  let plan = match GraphCompiler::new(&settings).compile(&definition, &registry) {
    Ok(plan) => plan,
    Err(e) => bail!("workflow is invalid: {e}"),
  };

  let report = PlanValidator::new(settings.validation.clone()).validate(&plan);
  for warning in &report.warnings {
    eprintln!("warning: {warning}");
  }

  let steps: Vec<serde_json::Value> = plan
    .steps
    .values()
    .map(|s| {
      json!({
        "id": s.node_id,
        "type": s.node_type,
        "kind": s.kind,
        "classification": s.classification,
        "nextSteps": s.next_steps,
      })
    })
    .collect();
  println!(
    "{}",
    serde_json::to_string_pretty(&json!({
      "workflowId": plan.workflow_id,
      "entryStepIds": plan.entry_step_ids,
      "steps": steps,
      "warnings": report.warnings,
    }))?
  );

  Ok(())
}

async fn run(workflow_file: &Path, mode: &str, db: &str, settings: EngineSettings) -> Result<()> {
  let payload = read_payload(workflow_file).await?;

  let store = SqliteStore::connect(db)
    .await
    .with_context(|| format!("failed to open database: {db}"))?;
  let coordinator = ExecutionCoordinator::new(settings, demo_registry(), Arc::new(store));

  let summary = coordinator
    .run_submission(payload, mode)
    .await
    .context("workflow execution was rejected")?;

  let row = coordinator
    .store()
    .get_execution(&summary.execution_id)
    .await?;
  println!(
    "{}",
    serde_json::to_string_pretty(&json!({
      "executionId": row.execution_id,
      "status": row.status,
      "totalNodes": row.total_nodes,
      "completedNodes": row.completed_nodes,
      "successfulNodes": row.successful_nodes,
      "failedNodes": row.failed_nodes,
      "totalRecords": row.total_records,
      "errorMessage": row.error_message,
    }))?
  );

  if row.status != weft_store::RunStatus::Success {
    bail!("execution finished with status {:?}", row.status);
  }
  Ok(())
}

async fn history(execution_id: &str, db: &str) -> Result<()> {
  let store = SqliteStore::connect(db)
    .await
    .with_context(|| format!("failed to open database: {db}"))?;

  let row = store.get_execution(execution_id).await?;
  let nodes = store.list_node_executions(execution_id).await?;

  println!(
    "{}",
    serde_json::to_string_pretty(&json!({
      "execution": row,
      "nodes": nodes,
    }))?
  );
  Ok(())
}

/// Registry of in-memory demo executors for the common node types.
///
/// Real deployments register their own `NodeExecutor` implementations;
/// this set is enough to validate and exercise workflows from the CLI.
fn demo_registry() -> ExecutorRegistry {
  let registry = ExecutorRegistry::new();
  for source in ["FileSource", "DBSource", "KafkaSource", "RestSource"] {
    registry.register(mock::source(source));
  }
  for transform in [
    "Filter",
    "Transform",
    "Map",
    "End",
    "Join",
    "Gather",
    "Collect",
    "Merge",
    "Intersect",
    "Minus",
    "Barrier",
    "JoinBarrier",
    "Split",
    "Replicate",
    "Partition",
    "HashPartition",
    "RangePartition",
    "Broadcast",
  ] {
    registry.register(mock::passthrough(transform));
  }
  for sink in ["FileSink", "DBSink", "ErrorSink", "Reject"] {
    registry.register(mock::sink(sink));
  }
  registry
}
