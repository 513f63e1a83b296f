//! Engine errors.

use weft_executor::ExecutorError;
use weft_plan::{PlanError, StepKind};

use crate::barrier::BarrierError;

/// Errors that can occur while building or driving a runtime flow.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// Compilation or validation of the plan failed.
  #[error(transparent)]
  Plan(#[from] PlanError),

  /// The submission payload could not be understood.
  #[error("invalid submission payload: {message}")]
  Payload { message: String },

  /// The plan contains a step kind the scheduler does not run yet.
  #[error("unsupported step kind {kind:?} for node '{node_id}'; no decider is implemented")]
  UnsupportedStep { node_id: String, kind: StepKind },

  /// The workflow has no ID and strict job identity is configured.
  #[error("workflow has no id and 'require-workflow-id' is set")]
  MissingWorkflowId,

  /// Restart was requested but disabled by configuration.
  #[error("restart is disabled: 'restartable' is off")]
  RestartDisabled,

  /// A step exhausted its retries and failed.
  #[error("step '{node_id}' failed: {source}")]
  Step {
    node_id: String,
    #[source]
    source: ExecutorError,
  },

  /// A join barrier observed a failed branch.
  #[error(transparent)]
  Barrier(#[from] BarrierError),

  /// The execution was cancelled cooperatively.
  #[error("execution cancelled")]
  Cancelled,

  /// A spawned branch task could not be joined.
  #[error("branch task failed: {message}")]
  BranchPanic { message: String },

  /// Persistence failed.
  #[error(transparent)]
  Store(#[from] weft_store::Error),
}
