use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a workflow run.
///
/// `running -> cancel_requested -> cancelled` is the only multi-hop path;
/// every other transition goes straight from `running` to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RunStatus {
  Running,
  Success,
  Failed,
  CancelRequested,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Success | Self::Failed | Self::Cancelled)
  }
}

/// Status of a single node execution within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NodeStatus {
  Running,
  Success,
  Failed,
  Skipped,
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LogLevel {
  Info,
  Warn,
  Error,
}

/// A workflow run as stored in `workflow_executions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionRow {
  pub execution_id: String,
  pub workflow_id: String,
  pub workflow_name: String,
  pub status: RunStatus,
  pub start_time: i64,
  pub end_time: Option<i64>,
  pub total_nodes: i64,
  pub completed_nodes: i64,
  pub successful_nodes: i64,
  pub failed_nodes: i64,
  pub total_records: i64,
  pub total_execution_time_ms: i64,
  pub execution_mode: String,
  /// Original submission JSON, kept verbatim for rerun.
  pub parameters: Json<Value>,
  pub error_message: Option<String>,
}

/// A node execution as stored in `node_executions`, keyed by
/// `(execution_id, node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct NodeExecutionRow {
  pub execution_id: String,
  pub node_id: String,
  pub node_label: Option<String>,
  pub node_type: String,
  pub status: NodeStatus,
  pub start_time: i64,
  pub end_time: Option<i64>,
  pub execution_time_ms: i64,
  pub records_processed: i64,
  pub retry_count: i64,
  pub error_message: Option<String>,
}

/// A log entry as stored in `execution_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionLogRow {
  pub timestamp: i64,
  pub datetime: String,
  pub level: LogLevel,
  pub execution_id: String,
  pub workflow_id: Option<String>,
  pub node_id: Option<String>,
  pub message: String,
  pub stack_trace: Option<String>,
}

impl ExecutionLogRow {
  /// Build a log entry stamped with the current time.
  pub fn now(
    level: LogLevel,
    execution_id: impl Into<String>,
    message: impl Into<String>,
  ) -> Self {
    let timestamp = now_millis();
    Self {
      timestamp,
      datetime: iso_datetime(timestamp),
      level,
      execution_id: execution_id.into(),
      workflow_id: None,
      node_id: None,
      message: message.into(),
      stack_trace: None,
    }
  }

  pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
    self.node_id = Some(node_id.into());
    self
  }

  pub fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
    self.workflow_id = Some(workflow_id.into());
    self
  }
}

/// Aggregate counters maintained on the run row while a run progresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
  pub completed_nodes: i64,
  pub successful_nodes: i64,
  pub failed_nodes: i64,
  pub total_records: i64,
  pub total_execution_time_ms: i64,
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// ISO-8601 UTC rendering of a Unix-millisecond timestamp, e.g.
/// `2024-05-01T12:30:00.000+0000`.
pub fn iso_datetime(millis: i64) -> String {
  Utc
    .timestamp_millis_opt(millis)
    .single()
    .unwrap_or_else(Utc::now)
    .format("%Y-%m-%dT%H:%M:%S%.3f%z")
    .to_string()
}
