use serde::{Deserialize, Serialize};
use weft_config::{ExecutionHints, ExecutionMode, FailurePolicy};

/// Control-flow kind of a compiled step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
  Normal,
  Fork,
  Join,
  Barrier,
  Decision,
  Subgraph,
}

impl StepKind {
  /// Kinds that execute as a synchronization tasklet rather than a
  /// chunk-oriented step.
  pub fn is_synchronization(self) -> bool {
    matches!(self, StepKind::Join | StepKind::Barrier)
  }
}

/// Dataflow role of a node, derived from its in/out data-edge counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
  Source,
  Sink,
  Transform,
  Split,
  Join,
  Control,
}

/// One outgoing edge of a compiled step, port names resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPort {
  pub target_node_id: String,
  pub source_port: String,
  pub target_port: String,
  pub is_control: bool,
}

/// A compiled node. Immutable once the plan is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepNode {
  pub node_id: String,
  pub node_type: String,
  pub config: serde_json::Value,
  /// Downstream steps on success, declaration order, deduplicated.
  pub next_steps: Vec<String>,
  /// Downstream steps entered on failure.
  pub error_steps: Vec<String>,
  /// Upstream data predecessors (consulted by joins).
  pub upstream_steps: Vec<String>,
  pub metrics: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_failure: Option<FailurePolicy>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub execution_hints: Option<ExecutionHints>,
  pub classification: Classification,
  pub output_ports: Vec<OutputPort>,
  pub kind: StepKind,
}

impl StepNode {
  /// Whether successors fan out in parallel.
  pub fn is_parallel(&self) -> bool {
    self
      .execution_hints
      .as_ref()
      .is_some_and(|h| h.mode == ExecutionMode::Parallel)
  }

  /// Declared join target for a fork, if any.
  pub fn join_node_id(&self) -> Option<&str> {
    self
      .execution_hints
      .as_ref()
      .and_then(|h| h.join_node_id.as_deref())
  }

  /// Output ports that carry records.
  pub fn data_output_ports(&self) -> impl Iterator<Item = &OutputPort> {
    self.output_ports.iter().filter(|p| !p.is_control)
  }

  /// Whether the step has more than one data output port (routing applies).
  pub fn has_routed_output(&self) -> bool {
    self.data_output_ports().count() > 1
  }

  /// Retry budget from the failure policy, zero when absent.
  pub fn max_retries(&self) -> u32 {
    self.on_failure.as_ref().map(|p| p.retries()).unwrap_or(0)
  }

  /// Whether per-record failures drop the record instead of failing the step.
  pub fn skips_records(&self) -> bool {
    self.on_failure.as_ref().is_some_and(|p| p.skips_records())
  }
}

/// Node-type tables shared by the compiler and validator.
pub mod node_types {
  use super::StepKind;

  /// The single entry node type. Never compiled into a step.
  pub const START: &str = "Start";

  /// Types that classify as join points for raw-graph validation
  /// (must have at least two incoming data edges).
  pub const STRICT_JOIN_TYPES: &[&str] = &["Join", "Merge", "Intersect", "Minus"];

  /// Fixed type-to-kind table. Types not listed compile to `NORMAL`
  /// (subject to the upstream/hint overrides).
  pub fn kind_for_type(node_type: &str) -> Option<StepKind> {
    match node_type {
      "Join" | "Gather" | "Collect" | "Merge" | "Intersect" | "Minus" => Some(StepKind::Join),
      "Barrier" | "JoinBarrier" => Some(StepKind::Barrier),
      "Decision" | "Switch" | "JobCondition" => Some(StepKind::Decision),
      "Subgraph" => Some(StepKind::Subgraph),
      "Split" | "Replicate" | "Partition" | "HashPartition" | "RangePartition" | "Broadcast" => {
        Some(StepKind::Fork)
      }
      _ => None,
    }
  }

  /// Whether the type belongs to the join family (preferred targets for
  /// join inference).
  pub fn is_join_family(node_type: &str) -> bool {
    matches!(kind_for_type(node_type), Some(StepKind::Join | StepKind::Barrier))
  }

  /// Sink-family types must not have outgoing data edges.
  pub fn is_sink(node_type: &str) -> bool {
    node_type.ends_with("Sink")
  }

  /// Targets of these types are wired as error steps, not successors.
  pub fn is_error_target(node_type: &str) -> bool {
    matches!(node_type, "Reject" | "ErrorSink")
  }
}
