use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use weft_plan::ExecutorCatalog;

use crate::error::ExecutorError;
use crate::traits::NodeExecutor;

/// Registry of node executors, keyed by trimmed node type.
///
/// Cheap to clone; all clones share the same executor table. External
/// components register their executors at startup, the compiler checks
/// presence through [`ExecutorCatalog`], and the engine resolves executors
/// per step.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
  executors: Arc<RwLock<HashMap<String, Arc<dyn NodeExecutor>>>>,
}

impl ExecutorRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register an executor under its own node type. A later registration
  /// for the same type replaces the earlier one.
  pub fn register(&self, executor: Arc<dyn NodeExecutor>) {
    let key = executor.node_type().trim().to_string();
    self.executors.write().unwrap().insert(key, executor);
  }

  pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
    self.executors.read().unwrap().get(node_type.trim()).cloned()
  }

  /// Resolve an executor, failing with a typed error when none is
  /// registered.
  pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn NodeExecutor>, ExecutorError> {
    self.get(node_type).ok_or_else(|| ExecutorError::UnknownType {
      node_type: node_type.trim().to_string(),
    })
  }

  pub fn contains(&self, node_type: &str) -> bool {
    self.executors.read().unwrap().contains_key(node_type.trim())
  }

  /// Registered node types, sorted for stable display.
  pub fn types(&self) -> Vec<String> {
    let mut types: Vec<String> = self.executors.read().unwrap().keys().cloned().collect();
    types.sort_unstable();
    types
  }
}

impl ExecutorCatalog for ExecutorRegistry {
  fn contains_type(&self, node_type: &str) -> bool {
    self.contains(node_type)
  }
}
