//! Join barriers.
//!
//! A join executes exactly once per fork region, after the parallel split
//! has structurally completed: the split awaits every branch before control
//! reaches the join, so the barrier itself does no waiting. It records the
//! synchronization event into the execution-scoped metadata bag and, as a
//! defensive assert, refuses to pass when a tracked branch failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use weft_store::now_millis;

/// Outcome of one fork branch, recorded as the branch sub-flow finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchOutcome {
  pub success: bool,
  pub completed_at: i64,
}

/// Thread-safe branch outcome tracker shared across an execution.
#[derive(Clone, Default)]
pub struct BranchTracker {
  inner: Arc<Mutex<HashMap<String, BranchOutcome>>>,
}

impl BranchTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record(&self, branch_id: impl Into<String>, success: bool) {
    self.inner.lock().unwrap().insert(
      branch_id.into(),
      BranchOutcome {
        success,
        completed_at: now_millis(),
      },
    );
  }

  /// Whether every listed branch has a recorded outcome.
  pub fn all_branches_complete(&self, branches: &[String]) -> bool {
    let inner = self.inner.lock().unwrap();
    branches.iter().all(|b| inner.contains_key(b))
  }

  /// Branches recorded as failed, among those listed.
  pub fn failed_branches(&self, branches: &[String]) -> Vec<String> {
    let inner = self.inner.lock().unwrap();
    branches
      .iter()
      .filter(|b| inner.get(*b).is_some_and(|o| !o.success))
      .cloned()
      .collect()
  }
}

/// A join refusing to pass because branches it synchronizes failed.
#[derive(Debug, thiserror::Error)]
#[error("join '{join_node_id}' observed failed branches: {failed_branches:?}")]
pub struct BarrierError {
  pub join_node_id: String,
  pub failed_branches: Vec<String>,
}

/// Synchronization record written into the execution metadata bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMetadata {
  pub join_node_id: String,
  pub upstream_branches: Vec<String>,
  pub completion_time: i64,
  pub duration_ms: u64,
}

/// Execution-scoped bag of join metadata, keyed by join node id.
#[derive(Clone, Default)]
pub struct MetadataBag {
  inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MetadataBag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, key: impl Into<String>, value: Value) {
    self.inner.lock().unwrap().insert(key.into(), value);
  }

  pub fn get(&self, key: &str) -> Option<Value> {
    self.inner.lock().unwrap().get(key).cloned()
  }

  pub fn snapshot(&self) -> HashMap<String, Value> {
    self.inner.lock().unwrap().clone()
  }
}

/// Run the barrier tasklet for a join step.
///
/// `duration_ms` is the time since the fork region started, i.e. how long
/// the slowest branch took to converge.
pub fn synchronize_join(
  execution_id: &str,
  join_node_id: &str,
  upstream_branches: &[String],
  duration_ms: u64,
  tracker: &BranchTracker,
  metadata: &MetadataBag,
) -> Result<(), BarrierError> {
  let failed = tracker.failed_branches(upstream_branches);
  if !failed.is_empty() {
    return Err(BarrierError {
      join_node_id: join_node_id.to_string(),
      failed_branches: failed,
    });
  }

  let record = JoinMetadata {
    join_node_id: join_node_id.to_string(),
    upstream_branches: upstream_branches.to_vec(),
    completion_time: now_millis(),
    duration_ms,
  };

  info!(
    execution_id = %execution_id,
    join_node_id = %join_node_id,
    upstream_branches = ?upstream_branches,
    duration_ms,
    "join_barrier_synchronized"
  );

  metadata.insert(
    join_node_id,
    serde_json::to_value(&record).unwrap_or(Value::Null),
  );

  Ok(())
}
