//! Plan validation.
//!
//! The second validation tier: structural and semantic checks over a
//! compiled [`ExecutionPlan`], run by the compiler after step construction
//! and again defensively by the scheduler before wiring the runtime flow.
//! Severity of the convergence and fork/join checks is controlled by
//! [`ValidationSettings`].

use std::collections::{HashMap, HashSet, VecDeque};

use weft_config::ValidationSettings;

use crate::error::PlanError;
use crate::plan::ExecutionPlan;
use crate::step::StepKind;

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
  pub errors: Vec<String>,
  pub warnings: Vec<String>,
}

impl ValidationReport {
  pub fn is_valid(&self) -> bool {
    self.errors.is_empty()
  }

  fn error(&mut self, message: impl Into<String>) {
    self.errors.push(message.into());
  }

  fn warning(&mut self, message: impl Into<String>) {
    self.warnings.push(message.into());
  }
}

/// Validates execution plans under configurable strictness.
pub struct PlanValidator {
  settings: ValidationSettings,
}

impl PlanValidator {
  pub fn new(settings: ValidationSettings) -> Self {
    Self { settings }
  }

  /// Run all checks and collect errors and warnings.
  pub fn validate(&self, plan: &ExecutionPlan) -> ValidationReport {
    let mut report = ValidationReport::default();

    if plan.is_empty() {
      report.error("execution plan has no steps");
      return report;
    }

    if plan.entry_step_ids.is_empty() {
      report.error("execution plan has no entry steps");
    }
    for entry in &plan.entry_step_ids {
      if !plan.contains_step(entry) {
        report.error(format!("entry step '{entry}' does not resolve to a plan step"));
      }
    }

    self.check_references(plan, &mut report);
    self.check_cycles(plan, &mut report);

    let incomers = incoming_transitions(plan);
    self.check_convergence(plan, &incomers, &mut report);
    self.check_forks(plan, &incomers, &mut report);
    self.check_joins(plan, &incomers, &mut report);
    self.check_orphans(plan, &mut report);

    report
  }

  /// Validate and raise a typed error carrying the full error list.
  pub fn ensure_valid(&self, plan: &ExecutionPlan) -> Result<(), PlanError> {
    let report = self.validate(plan);
    if report.is_valid() {
      Ok(())
    } else {
      Err(PlanError::Invalid {
        errors: report.errors,
      })
    }
  }

  fn check_references(&self, plan: &ExecutionPlan, report: &mut ValidationReport) {
    for step in plan.steps.values() {
      for (list, name) in [
        (&step.next_steps, "nextSteps"),
        (&step.error_steps, "errorSteps"),
        (&step.upstream_steps, "upstreamSteps"),
      ] {
        for reference in list {
          if !plan.contains_step(reference) {
            report.error(format!(
              "step '{}' references unknown step '{reference}' in {name}",
              step.node_id
            ));
          }
        }
      }
    }
  }

  fn check_cycles(&self, plan: &ExecutionPlan, report: &mut ValidationReport) {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::new();
    let mut path: Vec<&str> = Vec::new();

    fn visit<'a>(
      node: &'a str,
      plan: &'a ExecutionPlan,
      visited: &mut HashSet<&'a str>,
      on_path: &mut HashSet<&'a str>,
      path: &mut Vec<&'a str>,
    ) -> Option<String> {
      if on_path.contains(node) {
        let start = path.iter().position(|n| *n == node).unwrap_or(0);
        let mut cycle: Vec<&str> = path[start..].to_vec();
        cycle.push(node);
        return Some(cycle.join(" -> "));
      }
      if !visited.insert(node) {
        return None;
      }
      on_path.insert(node);
      path.push(node);
      if let Some(step) = plan.get_step(node) {
        for next in step.next_steps.iter().chain(step.error_steps.iter()) {
          if let Some(cycle) = visit(next, plan, visited, on_path, path) {
            return Some(cycle);
          }
        }
      }
      path.pop();
      on_path.remove(node);
      None
    }

    for id in plan.steps.keys() {
      if let Some(cycle) = visit(id, plan, &mut visited, &mut on_path, &mut path) {
        report.error(format!("Cycle detected: {cycle}"));
        return;
      }
    }
  }

  fn check_convergence(
    &self,
    plan: &ExecutionPlan,
    incomers: &HashMap<&str, Vec<&str>>,
    report: &mut ValidationReport,
  ) {
    for step in plan.steps.values() {
      let inbound = incomers
        .get(step.node_id.as_str())
        .map(Vec::as_slice)
        .unwrap_or(&[]);
      if inbound.len() <= 1 || step.kind.is_synchronization() {
        continue;
      }
      if exclusive_merge_ancestor(plan, incomers, inbound).is_some() {
        continue;
      }

      let message = format!(
        "step '{}' has {} incoming transitions but is not a JOIN or BARRIER",
        step.node_id,
        inbound.len()
      );
      if self.settings.strict_joins {
        report.error(message);
      } else {
        report.warning(message);
      }
    }
  }

  fn check_forks(
    &self,
    plan: &ExecutionPlan,
    incomers: &HashMap<&str, Vec<&str>>,
    report: &mut ValidationReport,
  ) {
    for step in plan.steps.values() {
      if step.kind != StepKind::Fork || step.next_steps.len() <= 1 {
        continue;
      }

      let Some(join_id) = step.join_node_id() else {
        let message = format!(
          "FORK node '{}' has {} parallel branches but no joinNodeId",
          step.node_id,
          step.next_steps.len()
        );
        if self.settings.require_explicit_join {
          report.error(message);
        } else {
          report.warning(message);
        }
        continue;
      };

      let Some(join) = plan.get_step(join_id) else {
        report.error(format!(
          "joinNodeId '{join_id}' of FORK '{}' does not resolve to a plan step",
          step.node_id
        ));
        continue;
      };
      if !join.kind.is_synchronization() {
        report.error(format!(
          "joinNodeId '{join_id}' of FORK '{}' is not a JOIN or BARRIER step",
          step.node_id
        ));
      }
      for branch in &step.next_steps {
        if !reaches(plan, branch, join_id) {
          report.error(format!(
            "branch '{branch}' of FORK '{}' cannot reach join '{join_id}'",
            step.node_id
          ));
        }
      }

      // The join synchronizes its fork region only. A predecessor outside
      // the branches would never be awaited by the split, so the scheduler
      // cannot run this topology.
      let region = fork_region(plan, &step.next_steps, join_id);
      let join_incomers = incomers.get(join_id).map(Vec::as_slice).unwrap_or(&[]);
      for pred in join_incomers {
        if *pred != step.node_id.as_str() && !region.contains(pred) {
          report.error(format!(
            "join '{join_id}' of FORK '{}' has predecessor '{pred}' outside the fork's branches",
            step.node_id
          ));
        }
      }
    }
  }

  fn check_joins(
    &self,
    plan: &ExecutionPlan,
    incomers: &HashMap<&str, Vec<&str>>,
    report: &mut ValidationReport,
  ) {
    for step in plan.steps.values() {
      if step.kind != StepKind::Join {
        continue;
      }
      let inbound = incomers
        .get(step.node_id.as_str())
        .map(Vec::as_slice)
        .unwrap_or(&[]);
      if inbound.len() < 2 {
        report.warning(format!(
          "JOIN step '{}' has fewer than 2 incoming transitions",
          step.node_id
        ));
      }
      if self.settings.strict_join_upstreams {
        let declared: HashSet<&str> = step.upstream_steps.iter().map(String::as_str).collect();
        let actual: HashSet<&str> = inbound.iter().copied().collect();
        if declared != actual {
          report.error(format!(
            "JOIN step '{}' declares upstream steps [{}] but actual incomers are [{}]",
            step.node_id,
            sorted_list(&declared),
            sorted_list(&actual)
          ));
        }
      }
    }
  }

  fn check_orphans(&self, plan: &ExecutionPlan, report: &mut ValidationReport) {
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = plan
      .entry_step_ids
      .iter()
      .map(String::as_str)
      .filter(|id| plan.contains_step(id))
      .collect();
    while let Some(id) = queue.pop_front() {
      if !reached.insert(id) {
        continue;
      }
      if let Some(step) = plan.get_step(id) {
        for next in step.next_steps.iter().chain(step.error_steps.iter()) {
          if plan.contains_step(next) && !reached.contains(next.as_str()) {
            queue.push_back(next);
          }
        }
      }
    }

    for id in plan.steps.keys() {
      if !reached.contains(id.as_str()) {
        report.warning(format!("step '{id}' is not reachable from any entry step"));
      }
    }
  }
}

/// Map of step id to the steps whose `next_steps` reference it.
fn incoming_transitions(plan: &ExecutionPlan) -> HashMap<&str, Vec<&str>> {
  let mut incomers: HashMap<&str, Vec<&str>> = HashMap::new();
  for step in plan.steps.values() {
    for next in &step.next_steps {
      incomers
        .entry(next.as_str())
        .or_default()
        .push(step.node_id.as_str());
    }
  }
  incomers
}

/// If every incomer traces back to the same DECISION step through
/// single-predecessor chains, the merge is exclusive and returns that
/// decision's id.
fn exclusive_merge_ancestor<'a>(
  plan: &'a ExecutionPlan,
  incomers: &HashMap<&'a str, Vec<&'a str>>,
  inbound: &[&'a str],
) -> Option<&'a str> {
  let mut decision: Option<&str> = None;
  for &origin in inbound {
    let mut current = origin;
    let found = loop {
      let step = plan.get_step(current)?;
      if step.kind == StepKind::Decision {
        break current;
      }
      let preds = incomers.get(current).map(Vec::as_slice).unwrap_or(&[]);
      if preds.len() != 1 {
        return None;
      }
      current = preds[0];
    };
    match decision {
      None => decision = Some(found),
      Some(existing) if existing == found => {}
      Some(_) => return None,
    }
  }
  decision
}

/// Steps reachable from a fork's branch heads via `next_steps`, without
/// passing through the declared join.
fn fork_region<'a>(
  plan: &'a ExecutionPlan,
  heads: &'a [String],
  join_id: &str,
) -> HashSet<&'a str> {
  let mut region = HashSet::new();
  let mut queue: Vec<&str> = heads
    .iter()
    .map(String::as_str)
    .filter(|h| *h != join_id)
    .collect();
  while let Some(id) = queue.pop() {
    if !region.insert(id) {
      continue;
    }
    if let Some(step) = plan.get_step(id) {
      for next in &step.next_steps {
        if next != join_id && !region.contains(next.as_str()) {
          queue.push(next);
        }
      }
    }
  }
  region
}

/// Whether `to` is reachable from `from` via `next_steps` (inclusive).
fn reaches(plan: &ExecutionPlan, from: &str, to: &str) -> bool {
  let mut seen = HashSet::new();
  let mut queue = vec![from];
  while let Some(id) = queue.pop() {
    if id == to {
      return true;
    }
    if !seen.insert(id) {
      continue;
    }
    if let Some(step) = plan.get_step(id) {
      queue.extend(step.next_steps.iter().map(String::as_str));
    }
  }
  false
}

fn sorted_list(set: &HashSet<&str>) -> String {
  let mut items: Vec<&str> = set.iter().copied().collect();
  items.sort_unstable();
  items.join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;
  use indexmap::IndexMap;

  use crate::step::{Classification, StepNode};

  fn step(id: &str, kind: StepKind, next: &[&str]) -> StepNode {
    StepNode {
      node_id: id.to_string(),
      node_type: "Transform".to_string(),
      config: serde_json::Value::Null,
      next_steps: next.iter().map(|s| s.to_string()).collect(),
      error_steps: vec![],
      upstream_steps: vec![],
      metrics: false,
      on_failure: None,
      execution_hints: None,
      classification: Classification::Transform,
      output_ports: vec![],
      kind,
    }
  }

  fn plan(entries: &[&str], steps: Vec<StepNode>) -> ExecutionPlan {
    ExecutionPlan {
      workflow_id: "wf".to_string(),
      entry_step_ids: entries.iter().map(|s| s.to_string()).collect(),
      steps: steps
        .into_iter()
        .map(|s| (s.node_id.clone(), s))
        .collect::<IndexMap<_, _>>(),
      inferred_joins: vec![],
    }
  }

  fn validator() -> PlanValidator {
    PlanValidator::new(ValidationSettings::default())
  }

  #[test]
  fn empty_plan_is_invalid() {
    let report = validator().validate(&plan(&[], vec![]));
    assert!(!report.is_valid());
    assert!(report.errors[0].contains("no steps"));
  }

  #[test]
  fn unresolved_references_are_errors() {
    let p = plan(&["A"], vec![step("A", StepKind::Normal, &["ghost"])]);
    let report = validator().validate(&p);
    assert!(report.errors.iter().any(|e| e.contains("ghost")));
  }

  #[test]
  fn detects_cycles_with_path() {
    let p = plan(
      &["A"],
      vec![
        step("A", StepKind::Normal, &["B"]),
        step("B", StepKind::Normal, &["A"]),
      ],
    );
    let report = validator().validate(&p);
    let error = report
      .errors
      .iter()
      .find(|e| e.contains("Cycle detected"))
      .unwrap();
    assert!(error.contains('A') && error.contains('B'));
  }

  #[test]
  fn convergence_into_non_join_warns_by_default() {
    let p = plan(
      &["A", "B"],
      vec![
        step("A", StepKind::Normal, &["C"]),
        step("B", StepKind::Normal, &["C"]),
        step("C", StepKind::Normal, &[]),
      ],
    );
    let report = validator().validate(&p);
    assert!(report.is_valid());
    assert!(report.warnings.iter().any(|w| w.contains("'C'")));
  }

  #[test]
  fn convergence_into_non_join_errors_in_strict_mode() {
    let p = plan(
      &["A", "B"],
      vec![
        step("A", StepKind::Normal, &["C"]),
        step("B", StepKind::Normal, &["C"]),
        step("C", StepKind::Normal, &[]),
      ],
    );
    let settings = ValidationSettings {
      strict_joins: true,
      ..Default::default()
    };
    let report = PlanValidator::new(settings).validate(&p);
    assert!(!report.is_valid());
  }

  #[test]
  fn exclusive_merge_from_single_decision_is_allowed() {
    let p = plan(
      &["D"],
      vec![
        step("D", StepKind::Decision, &["A", "B"]),
        step("A", StepKind::Normal, &["M"]),
        step("B", StepKind::Normal, &["M"]),
        step("M", StepKind::Normal, &[]),
      ],
    );
    let settings = ValidationSettings {
      strict_joins: true,
      ..Default::default()
    };
    let report = PlanValidator::new(settings).validate(&p);
    assert!(report.is_valid(), "errors: {:?}", report.errors);
  }

  #[test]
  fn fork_join_must_be_reachable_from_every_branch() {
    let mut fork = step("F", StepKind::Fork, &["A", "B"]);
    fork.execution_hints = Some(weft_config::ExecutionHints::parallel("J"));
    let p = plan(
      &["F"],
      vec![
        fork,
        step("A", StepKind::Normal, &["J"]),
        step("B", StepKind::Normal, &[]),
        step("J", StepKind::Join, &[]),
      ],
    );
    let report = validator().validate(&p);
    assert!(report.errors.iter().any(|e| e.contains("cannot reach join")));
  }

  #[test]
  fn join_with_predecessor_outside_the_fork_region_is_rejected() {
    let mut fork = step("F", StepKind::Fork, &["A", "B"]);
    fork.execution_hints = Some(weft_config::ExecutionHints::parallel("J"));
    // X feeds the join from outside the fork's branches; the split would
    // never await it.
    let p = plan(
      &["F", "X"],
      vec![
        fork,
        step("A", StepKind::Normal, &["J"]),
        step("B", StepKind::Normal, &["J"]),
        step("X", StepKind::Normal, &["J"]),
        step("J", StepKind::Join, &[]),
      ],
    );

    let report = validator().validate(&p);
    assert!(
      report
        .errors
        .iter()
        .any(|e| e.contains("'X'") && e.contains("outside the fork's branches")),
      "errors: {:?}",
      report.errors
    );
  }

  #[test]
  fn join_fed_only_by_its_fork_branches_is_accepted() {
    let mut fork = step("F", StepKind::Fork, &["A", "B"]);
    fork.execution_hints = Some(weft_config::ExecutionHints::parallel("J"));
    let p = plan(
      &["F"],
      vec![
        fork,
        step("A", StepKind::Normal, &["A2"]),
        step("A2", StepKind::Normal, &["J"]),
        step("B", StepKind::Normal, &["J"]),
        step("J", StepKind::Join, &[]),
      ],
    );

    let report = validator().validate(&p);
    assert!(report.is_valid(), "errors: {:?}", report.errors);
  }

  #[test]
  fn missing_fork_join_errors_when_required() {
    let p = plan(
      &["F"],
      vec![
        step("F", StepKind::Fork, &["A", "B"]),
        step("A", StepKind::Normal, &[]),
        step("B", StepKind::Normal, &[]),
      ],
    );
    let settings = ValidationSettings {
      require_explicit_join: true,
      ..Default::default()
    };
    let report = PlanValidator::new(settings).validate(&p);
    assert!(report.errors.iter().any(|e| e.contains("joinNodeId")));

    let lenient = validator().validate(&p);
    assert!(lenient.is_valid());
    assert!(!lenient.warnings.is_empty());
  }

  #[test]
  fn join_upstream_mismatch_errors_when_strict() {
    let mut join = step("J", StepKind::Join, &[]);
    join.upstream_steps = vec!["A".to_string(), "X".to_string()];
    let p = plan(
      &["A", "B"],
      vec![
        step("A", StepKind::Normal, &["J"]),
        step("B", StepKind::Normal, &["J"]),
        step("X", StepKind::Normal, &[]),
        join,
      ],
    );
    let settings = ValidationSettings {
      strict_join_upstreams: true,
      ..Default::default()
    };
    let report = PlanValidator::new(settings).validate(&p);
    assert!(report.errors.iter().any(|e| e.contains("actual incomers")));
  }

  #[test]
  fn unreachable_steps_warn() {
    let p = plan(
      &["A"],
      vec![
        step("A", StepKind::Normal, &[]),
        step("Orphan", StepKind::Normal, &[]),
      ],
    );
    let report = validator().validate(&p);
    assert!(report.is_valid());
    assert!(report.warnings.iter().any(|w| w.contains("Orphan")));
  }
}
