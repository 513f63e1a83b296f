use serde::{Deserialize, Serialize};

/// How a node fans its successors out at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
  Serial,
  Parallel,
}

/// What to do once a node's retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureAction {
  /// Fail the step (and route to error steps, if any).
  Fail,
  /// Drop the offending record and continue the chunk.
  SkipRecord,
}
