//! Execution coordination.
//!
//! The coordinator drives a submission end-to-end: normalize the payload,
//! compile and validate the plan, insert the run row, execute under a
//! fresh execution id, persist node transitions through the event channel,
//! and finalize the run with a terminal status. It also owns the
//! cooperative cancel path and both partial-restart entry points.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;
use weft_buffer::EdgeBufferStore;
use weft_config::{EngineSettings, WorkflowDefinition, normalize};
use weft_executor::ExecutorRegistry;
use weft_plan::{ExecutionPlan, GraphCompiler, restart};
use weft_store::{
  ExecutionLogRow, Json, LogLevel, NodeExecutionRow, NodeStatus, RunCounters, RunStatus, Store,
  WorkflowExecutionRow, now_millis,
};

use crate::engine::WorkflowEngine;
use crate::error::EngineError;
use crate::events::{ChannelNotifier, ExecutionEvent};

/// Terminal summary of a driven run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
  pub execution_id: String,
  pub status: RunStatus,
  pub error_message: Option<String>,
}

/// End-to-end driver for workflow submissions.
#[derive(Clone)]
pub struct ExecutionCoordinator {
  settings: EngineSettings,
  registry: ExecutorRegistry,
  store: Arc<dyn Store>,
  engine: Arc<WorkflowEngine>,
  buffers: EdgeBufferStore,
  cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ExecutionCoordinator {
  pub fn new(settings: EngineSettings, registry: ExecutorRegistry, store: Arc<dyn Store>) -> Self {
    let buffers = EdgeBufferStore::new(settings.edge_buffer.max_records);
    let engine = Arc::new(WorkflowEngine::new(
      registry.clone(),
      buffers.clone(),
      settings.clone(),
    ));
    Self {
      settings,
      registry,
      store,
      engine,
      buffers,
      cancellations: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  pub fn engine(&self) -> &WorkflowEngine {
    &self.engine
  }

  /// Normalize, deserialize, and compile a submission without running it.
  ///
  /// Returns the parsed definition, the validated plan, and the normalized
  /// payload (persisted verbatim as the run's `parameters`).
  pub fn compile_submission(
    &self,
    payload: Value,
  ) -> Result<(WorkflowDefinition, ExecutionPlan, Value), EngineError> {
    let normalized = normalize::normalize_payload(payload);
    let workflow = normalize::workflow_object(&normalized).ok_or_else(|| EngineError::Payload {
      message: "payload matches neither the workflow nor the canvas shape".to_string(),
    })?;
    let definition: WorkflowDefinition =
      serde_json::from_value(workflow.clone()).map_err(|e| EngineError::Payload {
        message: e.to_string(),
      })?;

    let plan = GraphCompiler::new(&self.settings).compile(&definition, &self.registry)?;
    Ok((definition, plan, normalized))
  }

  /// Run a submission to its terminal state.
  pub async fn run_submission(
    &self,
    payload: Value,
    execution_mode: &str,
  ) -> Result<RunSummary, EngineError> {
    let (definition, plan, normalized) = self.compile_submission(payload)?;
    let prepared = self
      .prepare(plan, &definition.name, normalized, execution_mode)
      .await?;
    Ok(self.drive(prepared).await)
  }

  /// Accept a submission and run it in the background.
  ///
  /// The run row exists when this returns; the caller polls the store for
  /// progress.
  pub async fn submit(&self, payload: Value, execution_mode: &str) -> Result<String, EngineError> {
    let (definition, plan, normalized) = self.compile_submission(payload)?;
    let prepared = self
      .prepare(plan, &definition.name, normalized, execution_mode)
      .await?;
    let execution_id = prepared.execution_id.clone();

    let coordinator = self.clone();
    let span = info_span!(
      "execution",
      execution_id = %execution_id,
      execution_mode = %execution_mode,
      timestamp = now_millis()
    );
    tokio::spawn(
      async move {
        coordinator.drive(prepared).await;
      }
      .instrument(span),
    );

    Ok(execution_id)
  }

  /// Request cancellation of a running execution.
  ///
  /// Returns `true` iff the run was still `running`; the engine observes
  /// the request between chunks and steps and drives the run to
  /// `cancelled`.
  pub async fn cancel(&self, execution_id: &str) -> Result<bool, EngineError> {
    let won = self.store.mark_cancel_requested(execution_id).await?;
    if won {
      self
        .store
        .append_log(&ExecutionLogRow::now(
          LogLevel::Info,
          execution_id,
          "cancel requested",
        ))
        .await?;
      if let Some(token) = self.cancellations.lock().unwrap().get(execution_id) {
        token.cancel();
      }
      info!(execution_id = %execution_id, "cancel_requested");
    }
    Ok(won)
  }

  /// Re-run a prior execution from an arbitrary node.
  pub async fn restart_from_node(
    &self,
    execution_id: &str,
    node_id: &str,
  ) -> Result<RunSummary, EngineError> {
    if !self.settings.job.restartable {
      return Err(EngineError::RestartDisabled);
    }
    let prior = self.store.get_execution(execution_id).await?;
    let (definition, plan, normalized) = self.compile_submission(prior.parameters.0.clone())?;
    let partial = restart::create_partial_plan(&plan, node_id)?;
    let prepared = self
      .prepare(partial, &definition.name, normalized, &prior.execution_mode)
      .await?;
    Ok(self.drive(prepared).await)
  }

  /// Re-run the failed nodes (and their descendants) of a prior execution.
  pub async fn restart_from_failed(&self, execution_id: &str) -> Result<RunSummary, EngineError> {
    if !self.settings.job.restartable {
      return Err(EngineError::RestartDisabled);
    }
    let prior = self.store.get_execution(execution_id).await?;
    let nodes = self.store.list_node_executions(execution_id).await?;
    let failed: HashSet<String> = nodes
      .iter()
      .filter(|n| n.status == NodeStatus::Failed)
      .map(|n| n.node_id.clone())
      .collect();

    let (definition, plan, normalized) = self.compile_submission(prior.parameters.0.clone())?;
    let partial = restart::create_partial_plan_from_failed(&plan, &failed)?;
    let prepared = self
      .prepare(partial, &definition.name, normalized, &prior.execution_mode)
      .await?;
    Ok(self.drive(prepared).await)
  }

  /// Insert the run row and register the cancellation token.
  async fn prepare(
    &self,
    plan: ExecutionPlan,
    workflow_name: &str,
    parameters: Value,
    execution_mode: &str,
  ) -> Result<PreparedRun, EngineError> {
    // Strict job identity refuses the submission before anything persists.
    self.engine.job_name(&plan)?;

    let execution_id = Uuid::new_v4().to_string();
    let row = WorkflowExecutionRow {
      execution_id: execution_id.clone(),
      workflow_id: plan.workflow_id.clone(),
      workflow_name: workflow_name.to_string(),
      status: RunStatus::Running,
      start_time: now_millis(),
      end_time: None,
      total_nodes: plan.len() as i64,
      completed_nodes: 0,
      successful_nodes: 0,
      failed_nodes: 0,
      total_records: 0,
      total_execution_time_ms: 0,
      execution_mode: execution_mode.to_string(),
      parameters: Json(parameters),
      error_message: None,
    };
    self.store.create_execution(&row).await?;
    self
      .store
      .append_log(
        &ExecutionLogRow::now(LogLevel::Info, &execution_id, "execution accepted")
          .with_workflow(&plan.workflow_id),
      )
      .await?;

    let cancel = CancellationToken::new();
    self
      .cancellations
      .lock()
      .unwrap()
      .insert(execution_id.clone(), cancel.clone());

    Ok(PreparedRun {
      execution_id,
      plan: Arc::new(plan),
      cancel,
    })
  }

  /// Execute a prepared run and finalize its row. Infallible by design:
  /// every outcome, including infrastructure failure, lands in a terminal
  /// status.
  async fn drive(&self, prepared: PreparedRun) -> RunSummary {
    let PreparedRun {
      execution_id,
      plan,
      cancel,
    } = prepared;

    let (sender, receiver) = mpsc::unbounded_channel();
    let notifier = Arc::new(ChannelNotifier::new(sender));
    let persistence = tokio::spawn(persist_events(self.store.clone(), receiver));

    let result = self
      .engine
      .execute(plan, &execution_id, notifier, cancel)
      .await;

    // The engine dropped its notifier clones; ours went into the call. With
    // all senders gone the persistence task drains and returns the final
    // counters.
    let counters = match persistence.await {
      Ok(counters) => counters,
      Err(e) => {
        error!(execution_id = %execution_id, error = %e, "persistence task failed");
        RunCounters::default()
      }
    };

    let (status, error_message) = match &result {
      Ok(()) => (RunStatus::Success, None),
      Err(EngineError::Cancelled) => (RunStatus::Cancelled, None),
      Err(e) => (RunStatus::Failed, Some(e.to_string())),
    };

    if let Err(e) = self
      .store
      .update_execution_counters(&execution_id, &counters)
      .await
    {
      error!(execution_id = %execution_id, error = %e, "failed to persist final counters");
    }
    if let Err(e) = self
      .store
      .finalize_execution(&execution_id, status, now_millis(), error_message.as_deref())
      .await
    {
      error!(execution_id = %execution_id, error = %e, "failed to finalize run row");
    }

    self.buffers.clear_execution(&execution_id);
    self.cancellations.lock().unwrap().remove(&execution_id);

    RunSummary {
      execution_id,
      status,
      error_message,
    }
  }
}

struct PreparedRun {
  execution_id: String,
  plan: Arc<ExecutionPlan>,
  cancel: CancellationToken,
}

/// Persistence listener: turns execution events into node rows, aggregate
/// counters, and log entries. Store failures are logged and skipped; the
/// run itself is not failed by a lost progress row.
async fn persist_events(
  store: Arc<dyn Store>,
  mut receiver: mpsc::UnboundedReceiver<ExecutionEvent>,
) -> RunCounters {
  let mut counters = RunCounters::default();
  let mut node_starts: HashMap<String, i64> = HashMap::new();

  while let Some(event) = receiver.recv().await {
    let outcome = match event {
      ExecutionEvent::WorkflowStarted {
        execution_id,
        workflow_id,
      } => {
        store
          .append_log(
            &ExecutionLogRow::now(LogLevel::Info, &execution_id, "workflow started")
              .with_workflow(&workflow_id),
          )
          .await
      }
      ExecutionEvent::NodeStarted {
        execution_id,
        node_id,
        node_type,
      } => {
        let start_time = now_millis();
        node_starts.insert(node_id.clone(), start_time);
        let row = NodeExecutionRow {
          execution_id: execution_id.clone(),
          node_id: node_id.clone(),
          node_label: None,
          node_type,
          status: NodeStatus::Running,
          start_time,
          end_time: None,
          execution_time_ms: 0,
          records_processed: 0,
          retry_count: 0,
          error_message: None,
        };
        match store.upsert_node_execution(&row).await {
          Ok(()) => {
            store
              .append_log(
                &ExecutionLogRow::now(LogLevel::Info, &execution_id, "node started")
                  .with_node(&node_id),
              )
              .await
          }
          Err(e) => Err(e),
        }
      }
      ExecutionEvent::NodeCompleted {
        execution_id,
        node_id,
        node_type,
        records_processed,
        duration_ms,
        retry_count,
      } => {
        let start_time = node_starts
          .get(&node_id)
          .copied()
          .unwrap_or_else(now_millis);
        let row = NodeExecutionRow {
          execution_id: execution_id.clone(),
          node_id: node_id.clone(),
          node_label: None,
          node_type,
          status: NodeStatus::Success,
          start_time,
          end_time: Some(now_millis()),
          execution_time_ms: duration_ms as i64,
          records_processed: records_processed as i64,
          retry_count: retry_count as i64,
          error_message: None,
        };
        counters.completed_nodes += 1;
        counters.successful_nodes += 1;
        counters.total_records += records_processed as i64;
        counters.total_execution_time_ms += duration_ms as i64;
        match store.upsert_node_execution(&row).await {
          Ok(()) => store.update_execution_counters(&execution_id, &counters).await,
          Err(e) => Err(e),
        }
      }
      ExecutionEvent::NodeFailed {
        execution_id,
        node_id,
        node_type,
        error,
        retry_count,
      } => {
        let start_time = node_starts
          .get(&node_id)
          .copied()
          .unwrap_or_else(now_millis);
        let row = NodeExecutionRow {
          execution_id: execution_id.clone(),
          node_id: node_id.clone(),
          node_label: None,
          node_type,
          status: NodeStatus::Failed,
          start_time,
          end_time: Some(now_millis()),
          execution_time_ms: now_millis().saturating_sub(start_time),
          records_processed: 0,
          retry_count: retry_count as i64,
          error_message: Some(error.clone()),
        };
        counters.completed_nodes += 1;
        counters.failed_nodes += 1;
        let upsert = store.upsert_node_execution(&row).await;
        let log = store
          .append_log(
            &ExecutionLogRow::now(LogLevel::Error, &execution_id, error).with_node(&node_id),
          )
          .await;
        match (upsert, log) {
          (Ok(()), Ok(())) => store.update_execution_counters(&execution_id, &counters).await,
          (Err(e), _) | (_, Err(e)) => Err(e),
        }
      }
      ExecutionEvent::WorkflowCompleted { execution_id } => {
        store
          .append_log(&ExecutionLogRow::now(
            LogLevel::Info,
            &execution_id,
            "workflow completed",
          ))
          .await
      }
      ExecutionEvent::WorkflowFailed {
        execution_id,
        error,
      } => {
        store
          .append_log(&ExecutionLogRow::now(
            LogLevel::Error,
            &execution_id,
            format!("workflow failed: {error}"),
          ))
          .await
      }
      ExecutionEvent::WorkflowCancelled { execution_id } => {
        store
          .append_log(&ExecutionLogRow::now(
            LogLevel::Warn,
            &execution_id,
            "workflow cancelled",
          ))
          .await
      }
    };

    if let Err(e) = outcome {
      error!(error = %e, "failed to persist execution event");
    }
  }

  counters
}
