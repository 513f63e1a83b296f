//! Workflow execution engine.
//!
//! Drives a compiled plan through its runtime flow: sequences run in
//! program order on the submitting task, parallel splits fan out onto a
//! shared bounded worker pool, and every join runs exactly once after its
//! split completes. Cancellation is cooperative and observed between steps
//! and between chunks.

use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, join_all};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;
use weft_buffer::EdgeBufferStore;
use weft_config::EngineSettings;
use weft_executor::{ExecutionContext, ExecutorRegistry};
use weft_plan::{ExecutionPlan, PlanError};

use crate::barrier::{BranchTracker, MetadataBag, synchronize_join};
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier};
use crate::flow::{Flow, FlowBuilder, FlowElement, SplitElement, StepElement};
use crate::step::run_chunked_step;

/// The workflow execution engine.
///
/// One engine instance serves every run of the process; the worker pool
/// bounding parallel splits is shared across all of them.
pub struct WorkflowEngine {
  registry: ExecutorRegistry,
  buffers: EdgeBufferStore,
  settings: EngineSettings,
  workers: Arc<Semaphore>,
}

impl WorkflowEngine {
  pub fn new(registry: ExecutorRegistry, buffers: EdgeBufferStore, settings: EngineSettings) -> Self {
    let workers = Arc::new(Semaphore::new(settings.scheduler.max.max(1)));
    Self {
      registry,
      buffers,
      settings,
      workers,
    }
  }

  pub fn buffers(&self) -> &EdgeBufferStore {
    &self.buffers
  }

  pub fn registry(&self) -> &ExecutorRegistry {
    &self.registry
  }

  /// Deterministic job name for a plan.
  ///
  /// Falls back to a random name when the workflow has no ID and the
  /// strict flag allows it; resuming such a run is impossible.
  pub fn job_name(&self, plan: &ExecutionPlan) -> Result<String, EngineError> {
    if plan.workflow_id.is_empty() {
      if self.settings.job.require_workflow_id {
        return Err(EngineError::MissingWorkflowId);
      }
      let name = format!("workflow-{}", Uuid::new_v4());
      warn!(
        job_name = %name,
        "workflow has no id; using a random job name, restart will not resume this run"
      );
      return Ok(name);
    }
    Ok(format!("workflow-{}", plan.workflow_id))
  }

  /// Execute a plan under the given execution id.
  ///
  /// Runs to a terminal outcome: `Ok` on success, `EngineError::Cancelled`
  /// when the token fired, any other error when a step or the
  /// infrastructure failed.
  pub async fn execute(
    &self,
    plan: Arc<ExecutionPlan>,
    execution_id: &str,
    notifier: Arc<dyn ExecutionNotifier>,
    cancel: CancellationToken,
  ) -> Result<(), EngineError> {
    let job_name = self.job_name(&plan)?;
    let flow = FlowBuilder::new(&plan, self.settings.validation.clone()).build()?;

    notifier.notify(ExecutionEvent::WorkflowStarted {
      execution_id: execution_id.to_string(),
      workflow_id: plan.workflow_id.clone(),
    });
    info!(
      execution_id = %execution_id,
      job_name = %job_name,
      steps = plan.len(),
      restartable = self.settings.job.restartable,
      "workflow_started"
    );

    let state = Arc::new(RunState {
      registry: self.registry.clone(),
      buffers: self.buffers.clone(),
      plan,
      execution_id: execution_id.to_string(),
      notifier: notifier.clone(),
      cancel,
      tracker: BranchTracker::new(),
      metadata: MetadataBag::new(),
      workers: self.workers.clone(),
    });

    let result = run_flow(state, flow).await;

    match &result {
      Ok(()) => {
        notifier.notify(ExecutionEvent::WorkflowCompleted {
          execution_id: execution_id.to_string(),
        });
        info!(execution_id = %execution_id, "workflow_completed");
      }
      Err(EngineError::Cancelled) => {
        notifier.notify(ExecutionEvent::WorkflowCancelled {
          execution_id: execution_id.to_string(),
        });
        warn!(execution_id = %execution_id, "workflow_cancelled");
      }
      Err(e) => {
        notifier.notify(ExecutionEvent::WorkflowFailed {
          execution_id: execution_id.to_string(),
          error: e.to_string(),
        });
        error!(execution_id = %execution_id, error = %e, "workflow_failed");
      }
    }

    result
  }
}

/// Everything a running flow shares across branches and tasks.
struct RunState {
  registry: ExecutorRegistry,
  buffers: EdgeBufferStore,
  plan: Arc<ExecutionPlan>,
  execution_id: String,
  notifier: Arc<dyn ExecutionNotifier>,
  cancel: CancellationToken,
  tracker: BranchTracker,
  metadata: MetadataBag,
  workers: Arc<Semaphore>,
}

/// Outcome of a completed split, handed to the join that follows it.
struct SplitSummary {
  branch_heads: Vec<String>,
  duration_ms: u64,
}

fn run_flow(state: Arc<RunState>, flow: Flow) -> BoxFuture<'static, Result<(), EngineError>> {
  Box::pin(async move {
    let mut last_split: Option<SplitSummary> = None;

    for element in flow.elements {
      if state.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
      }
      match element {
        FlowElement::Step(step) => {
          run_step_element(&state, step, last_split.take()).await?;
        }
        FlowElement::Split(split) => {
          last_split = Some(run_split(&state, split).await?);
        }
      }
    }
    Ok(())
  })
}

/// Fan a split's branches out onto the worker pool and await them all.
async fn run_split(state: &Arc<RunState>, split: SplitElement) -> Result<SplitSummary, EngineError> {
  let started = Instant::now();
  let branch_heads: Vec<String> = split
    .branches
    .iter()
    .map(|b| b.head_id().unwrap_or("branch").to_string())
    .collect();

  let mut handles = Vec::with_capacity(split.branches.len());
  for (branch, branch_id) in split.branches.into_iter().zip(branch_heads.iter().cloned()) {
    let state = state.clone();
    let span = info_span!(
      "branch",
      execution_id = %state.execution_id,
      fork_id = split.fork_id.as_deref().unwrap_or(""),
      branch = %branch_id
    );
    handles.push(tokio::spawn(
      async move {
        let _permit = state
          .workers
          .clone()
          .acquire_owned()
          .await
          .map_err(|e| EngineError::BranchPanic {
            message: format!("worker pool closed: {e}"),
          })?;
        let result = run_flow(state.clone(), branch).await;
        state.tracker.record(&branch_id, result.is_ok());
        result
      }
      .instrument(span),
    ));
  }

  let mut first_error = None;
  for joined in join_all(handles).await {
    let outcome = match joined {
      Ok(outcome) => outcome,
      Err(join_error) => Err(EngineError::BranchPanic {
        message: join_error.to_string(),
      }),
    };
    if let Err(e) = outcome {
      if first_error.is_none() {
        first_error = Some(e);
      }
    }
  }

  match first_error {
    Some(e) => Err(e),
    None => Ok(SplitSummary {
      branch_heads,
      duration_ms: started.elapsed().as_millis() as u64,
    }),
  }
}

/// Run one step: a barrier tasklet for joins, a chunk-oriented step
/// otherwise. A failing step enters its error route, after which the whole
/// flow ends.
async fn run_step_element(
  state: &Arc<RunState>,
  element: StepElement,
  split: Option<SplitSummary>,
) -> Result<(), EngineError> {
  let step = state
    .plan
    .get_step(&element.node_id)
    .cloned()
    .ok_or_else(|| {
      EngineError::Plan(PlanError::Invalid {
        errors: vec![format!("flow references unknown step '{}'", element.node_id)],
      })
    })?;

  let started = Instant::now();
  state.notifier.notify(ExecutionEvent::NodeStarted {
    execution_id: state.execution_id.clone(),
    node_id: step.node_id.clone(),
    node_type: step.node_type.clone(),
  });
  info!(
    execution_id = %state.execution_id,
    node_id = %step.node_id,
    node_type = %step.node_type,
    "node_started"
  );

  let mut retry_count = 0u32;
  let result = if step.kind.is_synchronization() {
    let (branches, duration_ms) = match &split {
      Some(summary) => (summary.branch_heads.clone(), summary.duration_ms),
      None => (step.upstream_steps.clone(), 0),
    };
    synchronize_join(
      &state.execution_id,
      &step.node_id,
      &branches,
      duration_ms,
      &state.tracker,
      &state.metadata,
    )
    .map(|()| crate::step::StepStats::default())
    .map_err(EngineError::from)
  } else {
    match state.registry.resolve(&step.node_type) {
      Ok(executor) => {
        let ctx = ExecutionContext::new(&state.execution_id, step.clone(), state.buffers.clone());
        run_chunked_step(&step, executor.as_ref(), &ctx, &state.cancel, &mut retry_count).await
      }
      Err(source) => Err(EngineError::Step {
        node_id: step.node_id.clone(),
        source,
      }),
    }
  };

  match result {
    Ok(stats) => {
      let duration_ms = started.elapsed().as_millis() as u64;
      state.notifier.notify(ExecutionEvent::NodeCompleted {
        execution_id: state.execution_id.clone(),
        node_id: step.node_id.clone(),
        node_type: step.node_type.clone(),
        records_processed: stats.records_processed,
        duration_ms,
        retry_count,
      });
      info!(
        execution_id = %state.execution_id,
        node_id = %step.node_id,
        records_processed = stats.records_processed,
        records_skipped = stats.records_skipped,
        duration_ms,
        "node_completed"
      );
      Ok(())
    }
    Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
    Err(e) => {
      state.notifier.notify(ExecutionEvent::NodeFailed {
        execution_id: state.execution_id.clone(),
        node_id: step.node_id.clone(),
        node_type: step.node_type.clone(),
        error: e.to_string(),
        retry_count,
      });
      error!(
        execution_id = %state.execution_id,
        node_id = %step.node_id,
        error = %e,
        "node_failed"
      );

      if let Some(error_flow) = element.error_flow {
        warn!(
          execution_id = %state.execution_id,
          node_id = %step.node_id,
          "entering error route"
        );
        if let Err(route_error) = run_flow(state.clone(), error_flow).await {
          error!(
            execution_id = %state.execution_id,
            node_id = %step.node_id,
            error = %route_error,
            "error route failed"
          );
        }
      }

      Err(e)
    }
  }
}
