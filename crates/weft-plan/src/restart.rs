//! Partial restart plans.
//!
//! A partial restart executes a reduced plan as a fresh run. Two entry
//! points: restart from an arbitrary node (forward-reachable subgraph), or
//! restart from the failed nodes of a prior run (failed nodes plus their
//! descendants, whose inputs are invalidated by the rerun). Succeeded nodes
//! outside that closure are not repeated.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::PlanError;
use crate::plan::ExecutionPlan;
use crate::step::StepKind;

/// Reduce `original` to the subgraph forward-reachable from `from_node_id`.
///
/// The chosen node becomes the sole entry step. A JOIN at the new entry has
/// lost its upstream branches and is demoted to NORMAL. Fails if a retained
/// FORK's declared join was pruned: one cannot restart mid-fork.
pub fn create_partial_plan(
  original: &ExecutionPlan,
  from_node_id: &str,
) -> Result<ExecutionPlan, PlanError> {
  if !original.contains_step(from_node_id) {
    return Err(PlanError::UnknownRestartNode {
      node_id: from_node_id.to_string(),
    });
  }

  let kept = original.forward_reach(from_node_id);
  build_partial(
    original,
    &kept,
    vec![from_node_id.to_string()],
    original.workflow_id.clone(),
  )
}

/// Reduce `original` to the rerun set of a prior execution: every failed
/// node plus everything downstream of one (downstream successes rerun
/// because their inputs change). Entry points are the failed nodes.
pub fn create_partial_plan_from_failed(
  original: &ExecutionPlan,
  failed: &HashSet<String>,
) -> Result<ExecutionPlan, PlanError> {
  let failed_in_plan: Vec<&String> = original
    .steps
    .keys()
    .filter(|id| failed.contains(*id))
    .collect();
  if failed_in_plan.is_empty() {
    return Err(PlanError::NothingToRestart);
  }

  let mut kept = HashSet::new();
  for id in &failed_in_plan {
    kept.extend(original.forward_reach(id.as_str()));
  }

  let entries: Vec<String> = failed_in_plan.iter().map(|id| (*id).clone()).collect();
  build_partial(
    original,
    &kept,
    entries,
    format!("{}_restart", original.workflow_id),
  )
}

fn build_partial(
  original: &ExecutionPlan,
  kept: &HashSet<String>,
  entry_step_ids: Vec<String>,
  workflow_id: String,
) -> Result<ExecutionPlan, PlanError> {
  let mut steps = IndexMap::new();
  for (id, step) in &original.steps {
    if !kept.contains(id) {
      continue;
    }

    if step.kind == StepKind::Fork {
      if let Some(join_id) = step.join_node_id() {
        if !kept.contains(join_id) {
          return Err(PlanError::ForkJoinSevered {
            fork_id: id.clone(),
            join_node_id: join_id.to_string(),
          });
        }
      }
    }

    let mut step = step.clone();
    step.next_steps.retain(|s| kept.contains(s));
    step.error_steps.retain(|s| kept.contains(s));
    step.upstream_steps.retain(|s| kept.contains(s));
    steps.insert(id.clone(), step);
  }

  // A join at the new boundary has no upstream branches left to wait for.
  for entry in &entry_step_ids {
    if let Some(step) = steps.get_mut(entry) {
      if step.kind == StepKind::Join && step.upstream_steps.is_empty() {
        step.kind = StepKind::Normal;
      }
    }
  }

  let inferred_joins = original
    .inferred_joins
    .iter()
    .filter(|(fork, join)| kept.contains(fork) && kept.contains(join))
    .cloned()
    .collect();

  Ok(ExecutionPlan {
    workflow_id,
    entry_step_ids,
    steps,
    inferred_joins,
  })
}
