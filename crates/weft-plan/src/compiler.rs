//! Graph compiler.
//!
//! Transforms a normalized [`WorkflowDefinition`] into an [`ExecutionPlan`]:
//! validates the raw graph, resolves entry steps from the control edges
//! leaving `Start`, classifies every node from its data-edge degrees,
//! derives successor/error/upstream references and output ports, assigns
//! control-flow kinds, and resolves the join target of every multi-branch
//! fork (declared, or inferred when the settings permit). The compiled plan
//! is then passed through the [`PlanValidator`](crate::PlanValidator) before
//! it is returned.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::warn;
use weft_config::{
  CompilerSettings, EngineSettings, ExecutionHints, NodeDefinition, ValidationSettings,
  WorkflowDefinition,
};

use crate::error::PlanError;
use crate::plan::ExecutionPlan;
use crate::step::{Classification, OutputPort, StepKind, StepNode, node_types};
use crate::validator::PlanValidator;

/// Lookup of registered executor types, implemented by the executor
/// registry. The compiler only needs presence, not the executors themselves.
pub trait ExecutorCatalog {
  fn contains_type(&self, node_type: &str) -> bool;
}

impl ExecutorCatalog for HashSet<String> {
  fn contains_type(&self, node_type: &str) -> bool {
    self.contains(node_type)
  }
}

/// Compiles workflow definitions into execution plans.
pub struct GraphCompiler {
  compiler: CompilerSettings,
  validation: ValidationSettings,
}

impl GraphCompiler {
  pub fn new(settings: &EngineSettings) -> Self {
    Self {
      compiler: settings.compiler.clone(),
      validation: settings.validation.clone(),
    }
  }

  /// Compile `definition` into a validated execution plan.
  ///
  /// `catalog` answers whether an executor is registered for a node type;
  /// every non-`Start` node must have one.
  pub fn compile(
    &self,
    definition: &WorkflowDefinition,
    catalog: &dyn ExecutorCatalog,
  ) -> Result<ExecutionPlan, PlanError> {
    let start = validate_definition(definition, catalog)?;

    let entry_step_ids = dedup_ordered(
      definition
        .edges
        .iter()
        .filter(|e| e.is_control && e.source == start.id)
        .map(|e| e.target.clone()),
    );

    let graph = Adjacency::new(definition);
    let mut steps: IndexMap<String, StepNode> = IndexMap::new();
    for node in &definition.nodes {
      if node.node_type == node_types::START {
        continue;
      }
      let step = compile_step(node, definition, &graph);
      steps.insert(node.id.clone(), step);
    }

    // The fork resolver walks successor chains; refuse cycles before it runs.
    if let Some(path) = find_cycle(&steps) {
      return Err(PlanError::Cycle {
        path: path.join(" -> "),
      });
    }

    let inferred_joins = self.resolve_fork_joins(&mut steps, &graph)?;

    let plan = ExecutionPlan {
      workflow_id: definition.id.clone().unwrap_or_default(),
      entry_step_ids,
      steps,
      inferred_joins,
    };

    PlanValidator::new(self.validation.clone()).ensure_valid(&plan)?;

    Ok(plan)
  }

  /// Resolve a join target for every multi-branch fork.
  fn resolve_fork_joins(
    &self,
    steps: &mut IndexMap<String, StepNode>,
    graph: &Adjacency,
  ) -> Result<Vec<(String, String)>, PlanError> {
    let fork_ids: Vec<String> = steps
      .values()
      .filter(|s| s.kind == StepKind::Fork && s.next_steps.len() > 1)
      .map(|s| s.node_id.clone())
      .collect();

    let mut inferred = Vec::new();
    for fork_id in fork_ids {
      let fork = &steps[&fork_id];
      let branches = fork.next_steps.len();

      if let Some(join_id) = fork.join_node_id() {
        if !steps.contains_key(join_id) {
          return Err(PlanError::UnknownJoinTarget {
            node_id: fork_id.clone(),
            join_node_id: join_id.to_string(),
          });
        }
        continue;
      }

      if self.compiler.allow_join_inference {
        match infer_join(&steps[&fork_id], steps, graph) {
          Some(join_id) => {
            warn!(
              fork_id = %fork_id,
              join_node_id = %join_id,
              "join target inferred; declare joinNodeId explicitly to silence this warning"
            );
            let step = &mut steps[&fork_id];
            step
              .execution_hints
              .get_or_insert_with(ExecutionHints::default)
              .join_node_id = Some(join_id.clone());
            inferred.push((fork_id.clone(), join_id));
          }
          None if self.compiler.strict_joins => {
            return Err(PlanError::JoinInference {
              node_id: fork_id,
              reason: "branches share no convergence node".to_string(),
            });
          }
          None => {
            warn!(fork_id = %fork_id, "no join target could be inferred for fork");
          }
        }
      } else if self.compiler.strict_joins {
        return Err(PlanError::MissingJoinTarget {
          node_id: fork_id,
          branches,
        });
      } else {
        warn!(
          fork_id = %fork_id,
          branches,
          "fork has no declared joinNodeId; branches will not be synchronized"
        );
      }
    }
    Ok(inferred)
  }
}

/// Raw-graph validation: invariants over the authored definition, before
/// any step exists.
fn validate_definition<'a>(
  definition: &'a WorkflowDefinition,
  catalog: &dyn ExecutorCatalog,
) -> Result<&'a NodeDefinition, PlanError> {
  if definition.nodes.is_empty() {
    return Err(PlanError::EmptyWorkflow);
  }

  let mut ids = HashSet::new();
  for (index, node) in definition.nodes.iter().enumerate() {
    if node.id.trim().is_empty() {
      return Err(PlanError::EmptyNodeId { index });
    }
    if !ids.insert(node.id.as_str()) {
      return Err(PlanError::DuplicateNodeId {
        node_id: node.id.clone(),
      });
    }
  }

  for edge in &definition.edges {
    for endpoint in [&edge.source, &edge.target] {
      if !ids.contains(endpoint.as_str()) {
        return Err(PlanError::UnknownEdgeEndpoint {
          edge_source: edge.source.clone(),
          target: edge.target.clone(),
          node_id: endpoint.clone(),
        });
      }
    }
  }

  let starts: Vec<&NodeDefinition> = definition
    .nodes
    .iter()
    .filter(|n| n.node_type == node_types::START)
    .collect();
  if starts.len() != 1 {
    return Err(PlanError::StartNodeCount { count: starts.len() });
  }
  let start = starts[0];

  let mut start_control = 0usize;
  for edge in definition.edges.iter().filter(|e| e.source == start.id) {
    if edge.is_control {
      start_control += 1;
    } else {
      return Err(PlanError::StartWithDataEdge {
        node_id: start.id.clone(),
      });
    }
  }
  if start_control == 0 {
    return Err(PlanError::StartWithoutControlEdge {
      node_id: start.id.clone(),
    });
  }

  for node in &definition.nodes {
    if node_types::is_sink(&node.node_type)
      && definition
        .edges
        .iter()
        .any(|e| e.source == node.id && !e.is_control)
    {
      return Err(PlanError::SinkWithDataEdge {
        node_id: node.id.clone(),
      });
    }
  }

  if let Some(path) = find_data_cycle(definition) {
    return Err(PlanError::Cycle {
      path: path.join(" -> "),
    });
  }

  for node in &definition.nodes {
    if node_types::STRICT_JOIN_TYPES.contains(&node.node_type.as_str()) {
      let incoming = definition
        .edges
        .iter()
        .filter(|e| e.target == node.id && !e.is_control)
        .count();
      if incoming < 2 {
        return Err(PlanError::JoinTooFewInputs {
          node_id: node.id.clone(),
          count: incoming,
        });
      }
    }
  }

  for node in &definition.nodes {
    if node.node_type == node_types::START {
      continue;
    }
    if !catalog.contains_type(node.node_type.trim()) {
      return Err(PlanError::MissingExecutor {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
      });
    }
  }

  Ok(start)
}

/// Forward/reverse adjacency over the raw edges.
struct Adjacency {
  data_out: HashMap<String, Vec<String>>,
  data_in: HashMap<String, Vec<String>>,
  control_out: HashMap<String, Vec<String>>,
}

impl Adjacency {
  fn new(definition: &WorkflowDefinition) -> Self {
    let mut data_out: HashMap<String, Vec<String>> = HashMap::new();
    let mut data_in: HashMap<String, Vec<String>> = HashMap::new();
    let mut control_out: HashMap<String, Vec<String>> = HashMap::new();

    for edge in &definition.edges {
      if edge.is_control {
        control_out
          .entry(edge.source.clone())
          .or_default()
          .push(edge.target.clone());
      } else {
        data_out
          .entry(edge.source.clone())
          .or_default()
          .push(edge.target.clone());
        data_in
          .entry(edge.target.clone())
          .or_default()
          .push(edge.source.clone());
      }
    }

    Self {
      data_out,
      data_in,
      control_out,
    }
  }

  fn data_targets(&self, node_id: &str) -> &[String] {
    self.data_out.get(node_id).map(Vec::as_slice).unwrap_or(&[])
  }

  fn data_sources(&self, node_id: &str) -> &[String] {
    self.data_in.get(node_id).map(Vec::as_slice).unwrap_or(&[])
  }

  fn control_targets(&self, node_id: &str) -> &[String] {
    self
      .control_out
      .get(node_id)
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  fn incoming_data_count(&self, node_id: &str) -> usize {
    self.data_sources(node_id).len()
  }
}

fn compile_step(
  node: &NodeDefinition,
  definition: &WorkflowDefinition,
  graph: &Adjacency,
) -> StepNode {
  let in_data = graph.data_sources(&node.id).len();
  let out_data = graph.data_targets(&node.id).len();

  let classification = match (in_data, out_data) {
    (0, o) if o > 0 => Classification::Source,
    (i, 0) if i > 0 => Classification::Sink,
    (1, o) if o > 1 => Classification::Split,
    (i, 1) if i > 1 => Classification::Join,
    (1, 1) => Classification::Transform,
    _ => Classification::Control,
  };

  let is_error_target = |id: &String| {
    definition
      .get_node(id)
      .is_some_and(|n| node_types::is_error_target(&n.node_type))
  };

  let next_steps = dedup_ordered(
    graph
      .data_targets(&node.id)
      .iter()
      .chain(graph.control_targets(&node.id))
      .filter(|id| !is_error_target(id))
      .cloned(),
  );

  let error_steps = dedup_ordered(
    graph
      .data_targets(&node.id)
      .iter()
      .chain(graph.control_targets(&node.id))
      .filter(|id| is_error_target(id))
      .cloned(),
  );

  let output_ports: Vec<OutputPort> = definition
    .edges
    .iter()
    .filter(|e| e.source == node.id)
    .map(|e| OutputPort {
      target_node_id: e.target.clone(),
      source_port: e.source_port().to_string(),
      target_port: e.target_port().to_string(),
      is_control: e.is_control,
    })
    .collect();

  let upstream_steps = dedup_ordered(graph.data_sources(&node.id).iter().cloned());

  let mut kind = node_types::kind_for_type(&node.node_type).unwrap_or(StepKind::Normal);
  if upstream_steps.len() > 1 && classification == Classification::Join {
    kind = StepKind::Join;
  }
  let parallel_hint = node
    .execution_hints
    .as_ref()
    .is_some_and(|h| h.mode == weft_config::ExecutionMode::Parallel);
  if next_steps.len() > 1 && parallel_hint {
    kind = StepKind::Fork;
  }

  StepNode {
    node_id: node.id.clone(),
    node_type: node.node_type.clone(),
    config: node.config.clone(),
    next_steps,
    error_steps,
    upstream_steps,
    metrics: node.metrics,
    on_failure: node.on_failure.clone(),
    execution_hints: node.execution_hints.clone(),
    classification,
    output_ports,
    kind,
  }
}

/// Infer the convergence node for a fork without a declared join.
///
/// Candidates are the common descendants of all branches; among them, a
/// join-family node whose incoming data-edge count covers every branch is
/// preferred, with the minimum max-depth from the fork as tie-break.
fn infer_join(
  fork: &StepNode,
  steps: &IndexMap<String, StepNode>,
  graph: &Adjacency,
) -> Option<String> {
  let branches = fork.next_steps.len();

  let mut common: Option<HashSet<String>> = None;
  for head in &fork.next_steps {
    let reach = successor_closure(head, steps);
    common = Some(match common {
      None => reach,
      Some(acc) => acc.intersection(&reach).cloned().collect(),
    });
  }
  let common = common?;
  if common.is_empty() {
    return None;
  }

  let mut depths = HashMap::new();
  let mut candidates: Vec<(&String, bool, usize)> = common
    .iter()
    .map(|id| {
      let step = &steps[id];
      let preferred = node_types::is_join_family(&step.node_type)
        && graph.incoming_data_count(id) >= branches;
      let depth = max_depth(&fork.node_id, id, steps, &mut depths);
      (id, preferred, depth)
    })
    .collect();

  // Preferred candidates first, then the shallowest.
  candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(b.0)));
  candidates.first().map(|(id, _, _)| (*id).clone())
}

/// All compiled steps reachable from `start` via `next_steps`, inclusive.
/// References that do not resolve to a step are left for the validator.
fn successor_closure(start: &str, steps: &IndexMap<String, StepNode>) -> HashSet<String> {
  let mut seen = HashSet::new();
  let mut queue = vec![start.to_string()];
  while let Some(id) = queue.pop() {
    let Some(step) = steps.get(&id) else {
      continue;
    };
    if !seen.insert(id) {
      continue;
    }
    queue.extend(step.next_steps.iter().cloned());
  }
  seen
}

/// Longest path length from `from` to `to` over `next_steps`. The plan is
/// cycle-checked before this runs.
fn max_depth(
  from: &str,
  to: &str,
  steps: &IndexMap<String, StepNode>,
  memo: &mut HashMap<String, Option<usize>>,
) -> usize {
  fn depth_of(
    node: &str,
    to: &str,
    steps: &IndexMap<String, StepNode>,
    memo: &mut HashMap<String, Option<usize>>,
  ) -> Option<usize> {
    if node == to {
      return Some(0);
    }
    if let Some(cached) = memo.get(node) {
      return *cached;
    }
    let mut best = None;
    if let Some(step) = steps.get(node) {
      for next in &step.next_steps {
        if let Some(d) = depth_of(next, to, steps, memo) {
          best = Some(best.map_or(d + 1, |b: usize| b.max(d + 1)));
        }
      }
    }
    memo.insert(node.to_string(), best);
    best
  }

  memo.clear();
  depth_of(from, to, steps, memo).unwrap_or(usize::MAX)
}

/// DFS cycle detection over the data-edge subgraph of the raw definition.
fn find_data_cycle(definition: &WorkflowDefinition) -> Option<Vec<String>> {
  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for edge in definition.edges.iter().filter(|e| !e.is_control) {
    adjacency
      .entry(edge.source.as_str())
      .or_default()
      .push(edge.target.as_str());
  }
  let nodes: Vec<&str> = definition.nodes.iter().map(|n| n.id.as_str()).collect();
  find_cycle_in(&nodes, &adjacency)
}

/// DFS cycle detection over compiled successor/error references.
fn find_cycle(steps: &IndexMap<String, StepNode>) -> Option<Vec<String>> {
  let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
  for step in steps.values() {
    adjacency.insert(
      step.node_id.as_str(),
      step
        .next_steps
        .iter()
        .chain(step.error_steps.iter())
        .map(String::as_str)
        .collect(),
    );
  }
  let nodes: Vec<&str> = steps.keys().map(String::as_str).collect();
  find_cycle_in(&nodes, &adjacency)
}

fn find_cycle_in<'a>(
  nodes: &[&'a str],
  adjacency: &HashMap<&'a str, Vec<&'a str>>,
) -> Option<Vec<String>> {
  let mut visited: HashSet<&str> = HashSet::new();
  let mut on_path: HashSet<&str> = HashSet::new();
  let mut path: Vec<&str> = Vec::new();

  fn visit<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
  ) -> Option<Vec<String>> {
    if on_path.contains(node) {
      // Slice the path from the first occurrence and close the loop.
      let start = path.iter().position(|n| *n == node).unwrap_or(0);
      let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
      cycle.push(node.to_string());
      return Some(cycle);
    }
    if visited.contains(node) {
      return None;
    }
    visited.insert(node);
    on_path.insert(node);
    path.push(node);
    for next in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
      if let Some(cycle) = visit(next, adjacency, visited, on_path, path) {
        return Some(cycle);
      }
    }
    path.pop();
    on_path.remove(node);
    None
  }

  for node in nodes {
    if let Some(cycle) = visit(node, adjacency, &mut visited, &mut on_path, &mut path) {
      return Some(cycle);
    }
  }
  None
}

fn dedup_ordered(items: impl Iterator<Item = String>) -> Vec<String> {
  let mut seen = HashSet::new();
  let mut out = Vec::new();
  for item in items {
    if seen.insert(item.clone()) {
      out.push(item);
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use weft_config::{Edge, NodeDefinition, WorkflowDefinition};

  fn catalog() -> HashSet<String> {
    [
      "FileSource",
      "Filter",
      "FileSink",
      "End",
      "Join",
      "Switch",
      "HashPartition",
      "Replicate",
      "Collect",
      "Transform",
      "Reject",
      "ErrorSink",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
  }

  fn node(id: &str, node_type: &str) -> NodeDefinition {
    NodeDefinition::new(id, node_type)
  }

  fn definition(nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> WorkflowDefinition {
    WorkflowDefinition {
      id: Some("wf-1".to_string()),
      name: "test".to_string(),
      nodes,
      edges,
    }
  }

  fn compiler() -> GraphCompiler {
    GraphCompiler::new(&weft_config::EngineSettings::default())
  }

  /// Start -> Source -> Filter -> Sink -> End, the simplest linear ETL.
  fn linear_definition() -> WorkflowDefinition {
    definition(
      vec![
        node("Start", "Start"),
        node("Source", "FileSource"),
        node("Filter", "Filter"),
        node("Sink", "FileSink"),
        node("End", "End"),
      ],
      vec![
        Edge::control("Start", "Source"),
        Edge::data("Source", "Filter"),
        Edge::data("Filter", "Sink"),
        Edge::control("Sink", "End"),
      ],
    )
  }

  #[test]
  fn compiles_linear_workflow() {
    let plan = compiler().compile(&linear_definition(), &catalog()).unwrap();

    assert_eq!(plan.entry_step_ids, vec!["Source"]);
    assert_eq!(plan.len(), 4);
    assert!(plan.steps.values().all(|s| s.kind == StepKind::Normal));

    let source = plan.get_step("Source").unwrap();
    assert_eq!(source.classification, Classification::Source);
    assert_eq!(source.next_steps, vec!["Filter"]);

    let filter = plan.get_step("Filter").unwrap();
    assert_eq!(filter.classification, Classification::Transform);
    assert_eq!(filter.upstream_steps, vec!["Source"]);

    let sink = plan.get_step("Sink").unwrap();
    assert_eq!(sink.classification, Classification::Sink);
    assert_eq!(sink.next_steps, vec!["End"]);
  }

  #[test]
  fn preserves_node_and_edge_order() {
    let plan = compiler().compile(&linear_definition(), &catalog()).unwrap();
    let ids: Vec<&String> = plan.steps.keys().collect();
    assert_eq!(ids, ["Source", "Filter", "Sink", "End"]);
  }

  #[test]
  fn wires_error_steps_separately_from_next_steps() {
    let def = definition(
      vec![
        node("Start", "Start"),
        node("Source", "FileSource"),
        node("T", "Transform"),
        node("Sink", "FileSink"),
        node("Errors", "ErrorSink"),
      ],
      vec![
        Edge::control("Start", "Source"),
        Edge::data("Source", "T"),
        Edge::data("T", "Sink"),
        Edge::data("T", "Errors"),
      ],
    );

    let plan = compiler().compile(&def, &catalog()).unwrap();
    let t = plan.get_step("T").unwrap();
    assert_eq!(t.next_steps, vec!["Sink"]);
    assert_eq!(t.error_steps, vec!["Errors"]);
  }

  #[test]
  fn rejects_missing_executor() {
    let def = definition(
      vec![node("Start", "Start"), node("X", "Mystery")],
      vec![Edge::control("Start", "X")],
    );

    let err = compiler().compile(&def, &catalog()).unwrap_err();
    assert!(matches!(err, PlanError::MissingExecutor { .. }));
    assert!(err.to_string().contains("Mystery"));
  }

  #[test]
  fn rejects_data_cycle_with_path_in_message() {
    let def = definition(
      vec![
        node("Start", "Start"),
        node("A", "Transform"),
        node("B", "Transform"),
      ],
      vec![
        Edge::control("Start", "A"),
        Edge::data("A", "B"),
        Edge::data("B", "A"),
      ],
    );

    let err = compiler().compile(&def, &catalog()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Cycle detected"));
    assert!(message.contains('A'));
    assert!(message.contains('B'));
  }

  #[test]
  fn rejects_duplicate_node_ids() {
    let def = definition(
      vec![
        node("Start", "Start"),
        node("A", "Transform"),
        node("A", "Filter"),
      ],
      vec![Edge::control("Start", "A")],
    );

    assert!(matches!(
      compiler().compile(&def, &catalog()),
      Err(PlanError::DuplicateNodeId { .. })
    ));
  }

  #[test]
  fn rejects_multiple_start_nodes() {
    let def = definition(
      vec![
        node("S1", "Start"),
        node("S2", "Start"),
        node("A", "Transform"),
      ],
      vec![Edge::control("S1", "A")],
    );

    assert!(matches!(
      compiler().compile(&def, &catalog()),
      Err(PlanError::StartNodeCount { count: 2 })
    ));
  }

  #[test]
  fn rejects_sink_with_outgoing_data_edge() {
    let def = definition(
      vec![
        node("Start", "Start"),
        node("Sink", "FileSink"),
        node("A", "Transform"),
      ],
      vec![Edge::control("Start", "Sink"), Edge::data("Sink", "A")],
    );

    assert!(matches!(
      compiler().compile(&def, &catalog()),
      Err(PlanError::SinkWithDataEdge { .. })
    ));
  }

  fn fork_definition(hints: Option<ExecutionHints>) -> WorkflowDefinition {
    let mut fork = node("Fork", "Replicate");
    fork.execution_hints = hints;
    definition(
      vec![
        node("Start", "Start"),
        fork,
        node("A", "Transform"),
        node("B", "Transform"),
        node("J", "Join"),
        node("Sink", "FileSink"),
      ],
      vec![
        Edge::control("Start", "Fork"),
        Edge::data("Fork", "A"),
        Edge::data("Fork", "B"),
        Edge::data("A", "J"),
        Edge::data("B", "J"),
        Edge::data("J", "Sink"),
      ],
    )
  }

  #[test]
  fn compiles_declared_fork_join() {
    let plan = compiler()
      .compile(&fork_definition(Some(ExecutionHints::parallel("J"))), &catalog())
      .unwrap();

    let fork = plan.get_step("Fork").unwrap();
    assert_eq!(fork.kind, StepKind::Fork);
    assert_eq!(fork.next_steps, vec!["A", "B"]);
    assert_eq!(fork.join_node_id(), Some("J"));

    let join = plan.get_step("J").unwrap();
    assert_eq!(join.kind, StepKind::Join);
    assert_eq!(join.upstream_steps, vec!["A", "B"]);
  }

  #[test]
  fn strict_mode_rejects_fork_without_join() {
    let err = compiler()
      .compile(&fork_definition(None), &catalog())
      .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("FORK node 'Fork'"));
    assert!(message.contains("joinNodeId"));
    assert!(message.contains('2'));
  }

  #[test]
  fn infers_join_when_permitted() {
    let mut settings = weft_config::EngineSettings::default();
    settings.compiler.allow_join_inference = true;

    let plan = GraphCompiler::new(&settings)
      .compile(&fork_definition(None), &catalog())
      .unwrap();

    let fork = plan.get_step("Fork").unwrap();
    assert_eq!(fork.join_node_id(), Some("J"));
    assert_eq!(
      plan.inferred_joins,
      vec![("Fork".to_string(), "J".to_string())]
    );
  }

  #[test]
  fn rejects_undeclared_join_target() {
    let def = fork_definition(Some(ExecutionHints::parallel("Nope")));
    assert!(matches!(
      compiler().compile(&def, &catalog()),
      Err(PlanError::UnknownJoinTarget { .. })
    ));
  }

  #[test]
  fn parallel_hint_promotes_multi_next_node_to_fork() {
    let mut splitter = node("T", "Transform");
    splitter.execution_hints = Some(ExecutionHints::parallel("J"));
    let def = definition(
      vec![
        node("Start", "Start"),
        node("Source", "FileSource"),
        splitter,
        node("A", "Filter"),
        node("B", "Filter"),
        node("J", "Join"),
        node("Sink", "FileSink"),
      ],
      vec![
        Edge::control("Start", "Source"),
        Edge::data("Source", "T"),
        Edge::data("T", "A"),
        Edge::data("T", "B"),
        Edge::data("A", "J"),
        Edge::data("B", "J"),
        Edge::data("J", "Sink"),
      ],
    );

    let plan = compiler().compile(&def, &catalog()).unwrap();
    assert_eq!(plan.get_step("T").unwrap().kind, StepKind::Fork);
    assert_eq!(plan.get_step("T").unwrap().classification, Classification::Split);
  }

  #[test]
  fn join_requires_two_incoming_data_edges() {
    let def = definition(
      vec![
        node("Start", "Start"),
        node("Source", "FileSource"),
        node("J", "Join"),
      ],
      vec![Edge::control("Start", "Source"), Edge::data("Source", "J")],
    );

    assert!(matches!(
      compiler().compile(&def, &catalog()),
      Err(PlanError::JoinTooFewInputs { count: 1, .. })
    ));
  }

  #[test]
  fn records_output_ports_with_defaults() {
    let def = definition(
      vec![
        node("Start", "Start"),
        node("Source", "FileSource"),
        node("Switch", "Switch"),
        node("S1", "FileSink"),
        node("S2", "FileSink"),
      ],
      vec![
        Edge::control("Start", "Source"),
        Edge::data("Source", "Switch"),
        Edge {
          source: "Switch".to_string(),
          target: "S1".to_string(),
          source_handle: Some("out1".to_string()),
          target_handle: None,
          is_control: false,
        },
        Edge {
          source: "Switch".to_string(),
          target: "S2".to_string(),
          source_handle: Some("out2".to_string()),
          target_handle: None,
          is_control: false,
        },
      ],
    );

    let plan = compiler().compile(&def, &catalog()).unwrap();
    let switch = plan.get_step("Switch").unwrap();
    assert_eq!(switch.kind, StepKind::Decision);
    let ports: Vec<(&str, &str, &str)> = switch
      .output_ports
      .iter()
      .map(|p| (p.target_node_id.as_str(), p.source_port.as_str(), p.target_port.as_str()))
      .collect();
    assert_eq!(ports, vec![("S1", "out1", "in"), ("S2", "out2", "in")]);
  }
}
