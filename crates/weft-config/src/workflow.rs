use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::node::NodeDefinition;

/// An authored workflow: ordered nodes plus typed edges.
///
/// Node and edge order is preserved through compilation; entry steps and
/// successor lists keep declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub name: String,
  pub nodes: Vec<NodeDefinition>,
  pub edges: Vec<Edge>,
}

impl WorkflowDefinition {
  /// Get a node by ID.
  pub fn get_node(&self, id: &str) -> Option<&NodeDefinition> {
    self.nodes.iter().find(|n| n.id == id)
  }
}
