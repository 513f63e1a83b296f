//! Runtime flow construction.
//!
//! Compiles a validated [`ExecutionPlan`] into a tree of sequences and
//! parallel splits. The walker is depth-first: NORMAL steps chain into
//! their successors (serially, unless hinted parallel at compile time),
//! FORK steps expand into a split whose branches are built exclusively up
//! to the declared join, the join sub-flow follows the split, and nested
//! forks recurse with their own inner join. Revisiting a node on the
//! current path fails fast as a cycle. DECISION and SUBGRAPH steps are
//! refused here; the validator admits them structurally, but no decider is
//! implemented.
//!
//! A JOIN referenced by several serial chains is attached once, where the
//! last incoming chain completes; every JOIN therefore appears exactly
//! once in the built flow.

use std::collections::HashMap;

use weft_config::ValidationSettings;
use weft_plan::{ExecutionPlan, PlanError, PlanValidator, StepKind, StepNode};

use crate::error::EngineError;

/// A runnable flow: elements execute in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flow {
  pub elements: Vec<FlowElement>,
}

impl Flow {
  fn push(&mut self, element: FlowElement) {
    self.elements.push(element);
  }

  fn append(&mut self, mut other: Flow) {
    self.elements.append(&mut other.elements);
  }

  pub fn is_empty(&self) -> bool {
    self.elements.is_empty()
  }

  /// Node id of the first step in this flow, used to label branches.
  pub fn head_id(&self) -> Option<&str> {
    self.elements.first().map(|e| match e {
      FlowElement::Step(step) => step.node_id.as_str(),
      FlowElement::Split(split) => split
        .branches
        .first()
        .and_then(|b| b.head_id())
        .unwrap_or("split"),
    })
  }

  /// Step ids in traversal order, splits flattened.
  pub fn step_ids(&self) -> Vec<&str> {
    let mut ids = Vec::new();
    collect_step_ids(self, &mut ids);
    ids
  }
}

fn collect_step_ids<'a>(flow: &'a Flow, ids: &mut Vec<&'a str>) {
  for element in &flow.elements {
    match element {
      FlowElement::Step(step) => ids.push(&step.node_id),
      FlowElement::Split(split) => {
        for branch in &split.branches {
          collect_step_ids(branch, ids);
        }
      }
    }
  }
}

/// One element of a flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowElement {
  /// A single step, with an optional error route.
  Step(StepElement),
  /// A parallel split; every branch completes before the flow continues.
  Split(SplitElement),
}

/// A step plus the error sub-flow entered when it fails.
#[derive(Debug, Clone, PartialEq)]
pub struct StepElement {
  pub node_id: String,
  pub error_flow: Option<Flow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitElement {
  /// Fork node the split expands, when one exists (multiple entry steps
  /// also split, without a fork).
  pub fork_id: Option<String>,
  pub branches: Vec<Flow>,
}

/// Walk mode of the depth-first builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Normal,
  Branch,
  Error,
}

/// Builds runtime flows from execution plans.
pub struct FlowBuilder<'a> {
  plan: &'a ExecutionPlan,
  validation: ValidationSettings,
  /// Incoming-transition counts, used to attach a chain-fed JOIN exactly
  /// once.
  incoming: HashMap<String, usize>,
}

impl<'a> FlowBuilder<'a> {
  pub fn new(plan: &'a ExecutionPlan, validation: ValidationSettings) -> Self {
    let mut incoming: HashMap<String, usize> = HashMap::new();
    for step in plan.steps.values() {
      for next in &step.next_steps {
        *incoming.entry(next.clone()).or_default() += 1;
      }
    }
    Self {
      plan,
      validation,
      incoming,
    }
  }

  /// Build the full runtime flow for the plan.
  ///
  /// The plan is re-validated first; the scheduler never trusts its input.
  pub fn build(&self) -> Result<Flow, EngineError> {
    PlanValidator::new(self.validation.clone()).ensure_valid(self.plan)?;

    let mut visiting = Vec::new();
    let mut arrivals = HashMap::new();

    let mut entry_flows = Vec::new();
    for entry in &self.plan.entry_step_ids {
      entry_flows.push(self.build_flow(entry, None, Mode::Normal, &mut visiting, &mut arrivals)?);
    }

    Ok(match entry_flows.len() {
      1 => entry_flows.pop().unwrap_or_default(),
      _ => {
        let mut flow = Flow::default();
        flow.push(FlowElement::Split(SplitElement {
          fork_id: None,
          branches: entry_flows,
        }));
        flow
      }
    })
  }

  fn build_flow(
    &self,
    node_id: &str,
    stop_at: Option<&str>,
    mode: Mode,
    visiting: &mut Vec<String>,
    arrivals: &mut HashMap<String, usize>,
  ) -> Result<Flow, EngineError> {
    self.build_flow_inner(node_id, stop_at, mode, visiting, arrivals, true)
  }

  /// Entry point for a fork's declared join: the structural attachment
  /// point, exempt from arrival counting.
  fn build_join_continuation(
    &self,
    join_id: &str,
    stop_at: Option<&str>,
    mode: Mode,
    visiting: &mut Vec<String>,
    arrivals: &mut HashMap<String, usize>,
  ) -> Result<Flow, EngineError> {
    self.build_flow_inner(join_id, stop_at, mode, visiting, arrivals, false)
  }

  fn build_flow_inner(
    &self,
    node_id: &str,
    stop_at: Option<&str>,
    mode: Mode,
    visiting: &mut Vec<String>,
    arrivals: &mut HashMap<String, usize>,
    gate_joins: bool,
  ) -> Result<Flow, EngineError> {
    // A branch walk ends where the fork's join begins (exclusive).
    if stop_at == Some(node_id) {
      return Ok(Flow::default());
    }

    if visiting.iter().any(|n| n == node_id) {
      let mut path = visiting.clone();
      path.push(node_id.to_string());
      return Err(EngineError::Plan(PlanError::Cycle {
        path: path.join(" -> "),
      }));
    }

    let step = self
      .plan
      .get_step(node_id)
      .ok_or_else(|| EngineError::Plan(PlanError::Invalid {
        errors: vec![format!("flow references unknown step '{node_id}'")],
      }))?;

    match step.kind {
      StepKind::Decision | StepKind::Subgraph => {
        return Err(EngineError::UnsupportedStep {
          node_id: node_id.to_string(),
          kind: step.kind,
        });
      }
      _ => {}
    }

    // A chain-fed JOIN attaches where its last incoming chain completes;
    // earlier arrivals contribute nothing.
    if gate_joins && step.kind.is_synchronization() {
      let expected = self.incoming.get(node_id).copied().unwrap_or(0).max(1);
      let count = arrivals.entry(node_id.to_string()).or_insert(0);
      *count += 1;
      if *count != expected {
        return Ok(Flow::default());
      }
    }

    visiting.push(node_id.to_string());

    let result = if step.kind == StepKind::Fork && step.next_steps.len() > 1 {
      self.build_fork(step, stop_at, mode, visiting, arrivals)
    } else {
      self.build_chain(step, stop_at, mode, visiting, arrivals)
    };

    visiting.pop();
    result
  }

  /// A step followed by its successors: a serial chain, or a parallel
  /// split for a hinted single-step fan-out.
  fn build_chain(
    &self,
    step: &StepNode,
    stop_at: Option<&str>,
    mode: Mode,
    visiting: &mut Vec<String>,
    arrivals: &mut HashMap<String, usize>,
  ) -> Result<Flow, EngineError> {
    let mut flow = Flow::default();
    flow.push(FlowElement::Step(StepElement {
      node_id: step.node_id.clone(),
      error_flow: self.build_error_flow(step, visiting, arrivals)?,
    }));

    match step.next_steps.len() {
      0 => {}
      1 => {
        flow.append(self.build_flow(&step.next_steps[0], stop_at, mode, visiting, arrivals)?);
      }
      _ if step.is_parallel() => {
        let mut branches = Vec::new();
        for next in &step.next_steps {
          branches.push(self.build_flow(next, stop_at, mode, visiting, arrivals)?);
        }
        flow.push(FlowElement::Split(SplitElement {
          fork_id: Some(step.node_id.clone()),
          branches,
        }));
      }
      _ => {
        // Serial fan-out: successors run one after another in declaration
        // order.
        for next in &step.next_steps {
          flow.append(self.build_flow(next, stop_at, mode, visiting, arrivals)?);
        }
      }
    }

    Ok(flow)
  }

  /// A fork: the fork step, a split over its branches built exclusively up
  /// to the declared join, the join sub-flow, then the continuation.
  fn build_fork(
    &self,
    step: &StepNode,
    stop_at: Option<&str>,
    mode: Mode,
    visiting: &mut Vec<String>,
    arrivals: &mut HashMap<String, usize>,
  ) -> Result<Flow, EngineError> {
    let mut flow = Flow::default();
    flow.push(FlowElement::Step(StepElement {
      node_id: step.node_id.clone(),
      error_flow: self.build_error_flow(step, visiting, arrivals)?,
    }));

    let join_id = step.join_node_id();

    let mut branches = Vec::new();
    for next in &step.next_steps {
      branches.push(self.build_branch_until_join(next, join_id, visiting, arrivals)?);
    }
    flow.push(FlowElement::Split(SplitElement {
      fork_id: Some(step.node_id.clone()),
      branches,
    }));

    if let Some(join_id) = join_id {
      flow.append(self.build_join_continuation(join_id, stop_at, mode, visiting, arrivals)?);
    }

    Ok(flow)
  }

  fn build_branch_until_join(
    &self,
    head: &str,
    join_id: Option<&str>,
    visiting: &mut Vec<String>,
    arrivals: &mut HashMap<String, usize>,
  ) -> Result<Flow, EngineError> {
    self.build_flow(head, join_id, Mode::Branch, visiting, arrivals)
  }

  /// Error route of a step: its error steps chained sequentially. The
  /// overall flow ends after the error route completes.
  fn build_error_flow(
    &self,
    step: &StepNode,
    visiting: &mut Vec<String>,
    arrivals: &mut HashMap<String, usize>,
  ) -> Result<Option<Flow>, EngineError> {
    if step.error_steps.is_empty() {
      return Ok(None);
    }
    let mut flow = Flow::default();
    for error_step in &step.error_steps {
      flow.append(self.build_flow(error_step, None, Mode::Error, visiting, arrivals)?);
    }
    Ok(Some(flow))
  }
}
