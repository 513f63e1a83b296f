use serde::{Deserialize, Serialize};

use crate::enums::{ExecutionMode, FailureAction};

/// An authored node in a workflow graph.
///
/// `config` is an opaque JSON tree; each executor parses the keys it needs
/// and rejects what it cannot interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
  pub id: String,
  #[serde(rename = "type")]
  pub node_type: String,
  #[serde(default)]
  pub config: serde_json::Value,
  #[serde(default)]
  pub metrics: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_failure: Option<FailurePolicy>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub execution_hints: Option<ExecutionHints>,
}

impl NodeDefinition {
  pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      node_type: node_type.into(),
      config: serde_json::Value::Null,
      metrics: false,
      on_failure: None,
      execution_hints: None,
    }
  }
}

/// Optional execution tuning attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionHints {
  #[serde(default = "ExecutionHints::default_mode")]
  pub mode: ExecutionMode,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub chunk_size: Option<usize>,
  /// Declared join target when this node forks into parallel branches.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub join_node_id: Option<String>,
}

impl ExecutionHints {
  fn default_mode() -> ExecutionMode {
    ExecutionMode::Serial
  }

  pub fn parallel(join_node_id: impl Into<String>) -> Self {
    Self {
      mode: ExecutionMode::Parallel,
      chunk_size: None,
      join_node_id: Some(join_node_id.into()),
    }
  }
}

impl Default for ExecutionHints {
  fn default() -> Self {
    Self {
      mode: ExecutionMode::Serial,
      chunk_size: None,
      join_node_id: None,
    }
  }
}

/// Per-node retry and skip semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePolicy {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_retries: Option<u32>,
  #[serde(default = "FailurePolicy::default_action")]
  pub action: FailureAction,
  #[serde(default)]
  pub skip_on_error: bool,
}

impl FailurePolicy {
  fn default_action() -> FailureAction {
    FailureAction::Fail
  }

  /// Retry budget, zero when unset.
  pub fn retries(&self) -> u32 {
    self.max_retries.unwrap_or(0)
  }

  /// Whether per-record errors should drop the record instead of failing
  /// the step.
  pub fn skips_records(&self) -> bool {
    self.skip_on_error || self.action == FailureAction::SkipRecord
  }
}

impl Default for FailurePolicy {
  fn default() -> Self {
    Self {
      max_retries: None,
      action: FailureAction::Fail,
      skip_on_error: false,
    }
  }
}
