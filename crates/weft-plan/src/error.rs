use thiserror::Error;

/// Errors raised while compiling, validating, or reducing a plan.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error("workflow has no nodes")]
  EmptyWorkflow,

  #[error("node at index {index} has an empty id")]
  EmptyNodeId { index: usize },

  #[error("duplicate node id '{node_id}'")]
  DuplicateNodeId { node_id: String },

  #[error("edge from '{edge_source}' to '{target}' references unknown node '{node_id}'")]
  UnknownEdgeEndpoint {
    edge_source: String,
    target: String,
    node_id: String,
  },

  #[error("workflow must contain exactly one Start node, found {count}")]
  StartNodeCount { count: usize },

  #[error("Start node '{node_id}' must have at least one outgoing control edge")]
  StartWithoutControlEdge { node_id: String },

  #[error("Start node '{node_id}' must not have outgoing data edges")]
  StartWithDataEdge { node_id: String },

  #[error("sink node '{node_id}' must not have outgoing data edges")]
  SinkWithDataEdge { node_id: String },

  #[error("join node '{node_id}' requires at least 2 incoming data edges, found {count}")]
  JoinTooFewInputs { node_id: String, count: usize },

  #[error("no executor registered for node type '{node_type}' (node '{node_id}')")]
  MissingExecutor { node_id: String, node_type: String },

  #[error("Cycle detected: {path}")]
  Cycle { path: String },

  #[error(
    "FORK node '{node_id}' has {branches} parallel branches but no joinNodeId is declared \
     and join inference is disabled"
  )]
  MissingJoinTarget { node_id: String, branches: usize },

  #[error("FORK node '{node_id}' declares joinNodeId '{join_node_id}' which is not in the plan")]
  UnknownJoinTarget {
    node_id: String,
    join_node_id: String,
  },

  #[error("could not infer a join node for FORK '{node_id}': {reason}")]
  JoinInference { node_id: String, reason: String },

  #[error("plan validation failed: {}", errors.join("; "))]
  Invalid { errors: Vec<String> },

  #[error("restart entry node '{node_id}' not found in plan")]
  UnknownRestartNode { node_id: String },

  #[error(
    "cannot build partial plan: FORK '{fork_id}' is retained but its join '{join_node_id}' is not"
  )]
  ForkJoinSevered {
    fork_id: String,
    join_node_id: String,
  },

  #[error("execution has no failed nodes to restart from")]
  NothingToRestart,
}
