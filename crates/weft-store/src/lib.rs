//! Weft Store
//!
//! Persistence for workflow runs. The [`Store`] trait defines the
//! operations the engine and coordinator need:
//!
//! - creating a run row when a submission is accepted, finalizing it with a
//!   terminal status and aggregate counters at job end
//! - the conditional `running -> cancel_requested` transition behind the
//!   cancel API
//! - upserting per-node execution rows as steps start and finish
//! - appending structured execution logs
//!
//! [`SqliteStore`] is the bundled implementation; rows and status enums are
//! in [`types`].

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use sqlx::types::Json;
pub use types::{
  ExecutionLogRow, LogLevel, NodeExecutionRow, NodeStatus, RunCounters, RunStatus,
  WorkflowExecutionRow, iso_datetime, now_millis,
};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage operations for workflow runs, node executions, and logs.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert the initial run row for an accepted submission.
  async fn create_execution(&self, row: &WorkflowExecutionRow) -> Result<(), Error>;

  /// Get a run row by execution ID.
  async fn get_execution(&self, execution_id: &str) -> Result<WorkflowExecutionRow, Error>;

  /// Run history for a workflow, newest first.
  async fn list_executions(&self, workflow_id: &str) -> Result<Vec<WorkflowExecutionRow>, Error>;

  /// Transition a run from `running` to `cancel_requested`.
  ///
  /// Returns `true` iff the update won, i.e. the run was still `running`.
  async fn mark_cancel_requested(&self, execution_id: &str) -> Result<bool, Error>;

  /// Write the terminal status, end time, and error message of a run.
  async fn finalize_execution(
    &self,
    execution_id: &str,
    status: RunStatus,
    end_time: i64,
    error_message: Option<&str>,
  ) -> Result<(), Error>;

  /// Update the aggregate counters on a run row.
  async fn update_execution_counters(
    &self,
    execution_id: &str,
    counters: &RunCounters,
  ) -> Result<(), Error>;

  /// Insert or update the node execution row keyed by
  /// `(execution_id, node_id)`.
  async fn upsert_node_execution(&self, row: &NodeExecutionRow) -> Result<(), Error>;

  /// Node execution rows of a run, in start order.
  async fn list_node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecutionRow>, Error>;

  /// Append an execution log entry.
  async fn append_log(&self, row: &ExecutionLogRow) -> Result<(), Error>;

  /// Log entries of a run, in timestamp order.
  async fn list_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLogRow>, Error>;
}
