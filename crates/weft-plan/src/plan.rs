use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::step::StepNode;

/// A compiled, validated workflow graph.
///
/// Step order follows node declaration order in the source workflow;
/// `entry_step_ids` follows the order of the control edges leaving `Start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
  pub workflow_id: String,
  pub entry_step_ids: Vec<String>,
  pub steps: IndexMap<String, StepNode>,
  /// Fork-to-join pairs resolved by inference rather than declaration,
  /// recorded for audit.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub inferred_joins: Vec<(String, String)>,
}

impl ExecutionPlan {
  /// Get a step by ID.
  pub fn get_step(&self, step_id: &str) -> Option<&StepNode> {
    self.steps.get(step_id)
  }

  pub fn contains_step(&self, step_id: &str) -> bool {
    self.steps.contains_key(step_id)
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Forward-reachable set from `start`, inclusive, following both success
  /// and error references.
  pub fn forward_reach(&self, start: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = vec![start.to_string()];
    while let Some(id) = queue.pop() {
      if !seen.insert(id.clone()) {
        continue;
      }
      if let Some(step) = self.steps.get(&id) {
        for next in step.next_steps.iter().chain(step.error_steps.iter()) {
          if !seen.contains(next) {
            queue.push(next.clone());
          }
        }
      }
    }
    seen
  }
}
