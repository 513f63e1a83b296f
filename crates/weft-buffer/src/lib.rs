//! Weft Buffer
//!
//! In-memory record queues between nodes. Each buffer is keyed by
//! `(execution_id, target_node_id, target_port)`: predecessors append
//! records as they write, the owning step drains them when it reads.
//! Capacity is bounded process-wide, summed across all keys of all
//! executions, and checked before every append.
//!
//! Buffers are created lazily on first write and dropped either per edge
//! (after the owning step has consumed them) or wholesale when an execution
//! reaches a terminal state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Default process-wide cap on buffered records.
pub const DEFAULT_MAX_RECORDS: usize = 50_000;

/// Errors raised by the buffer store.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
  /// The process-wide record cap was reached; nothing was appended.
  #[error(
    "Edge buffer overflow for execution '{execution_id}' on edge '{edge}': limit={limit}"
  )]
  Overflow {
    execution_id: String,
    edge: String,
    limit: usize,
  },
}

#[derive(Default)]
struct Inner {
  buffers: HashMap<String, Vec<Value>>,
  total: usize,
}

/// Shared store of bounded edge buffers.
///
/// Cheap to clone; all clones share the same buffers and record counter.
/// Reads take a shared lock, writes an exclusive one, so the overflow check
/// and the append it guards are a single atomic section.
#[derive(Clone)]
pub struct EdgeBufferStore {
  max_records: usize,
  inner: Arc<RwLock<Inner>>,
}

impl EdgeBufferStore {
  pub fn new(max_records: usize) -> Self {
    Self {
      max_records,
      inner: Arc::new(RwLock::new(Inner::default())),
    }
  }

  fn key(execution_id: &str, node_id: &str, port: &str) -> String {
    format!("{execution_id}:{node_id}:{port}")
  }

  /// Append one record to the buffer for `(node_id, port)` of an execution.
  ///
  /// Fails without appending when the process-wide cap is reached.
  pub fn add(
    &self,
    execution_id: &str,
    node_id: &str,
    port: &str,
    record: Value,
  ) -> Result<(), BufferError> {
    let mut inner = self.inner.write().unwrap();
    if inner.total >= self.max_records {
      return Err(BufferError::Overflow {
        execution_id: execution_id.to_string(),
        edge: format!("{node_id}:{port}"),
        limit: self.max_records,
      });
    }
    inner.total += 1;
    inner
      .buffers
      .entry(Self::key(execution_id, node_id, port))
      .or_default()
      .push(record);
    Ok(())
  }

  /// Current contents of one buffer (a read view; the buffer is unchanged).
  pub fn get(&self, execution_id: &str, node_id: &str, port: &str) -> Vec<Value> {
    let inner = self.inner.read().unwrap();
    inner
      .buffers
      .get(&Self::key(execution_id, node_id, port))
      .cloned()
      .unwrap_or_default()
  }

  /// Whether any records are buffered for `(node_id, port)`.
  pub fn has_records(&self, execution_id: &str, node_id: &str, port: &str) -> bool {
    let inner = self.inner.read().unwrap();
    inner
      .buffers
      .get(&Self::key(execution_id, node_id, port))
      .is_some_and(|b| !b.is_empty())
  }

  /// Drop one buffer, releasing its records from the global count.
  pub fn clear_buffer(&self, execution_id: &str, node_id: &str, port: &str) {
    let mut inner = self.inner.write().unwrap();
    if let Some(buffer) = inner.buffers.remove(&Self::key(execution_id, node_id, port)) {
      inner.total -= buffer.len();
    }
  }

  /// Drop every buffer belonging to an execution.
  pub fn clear_execution(&self, execution_id: &str) {
    let prefix = format!("{execution_id}:");
    let mut inner = self.inner.write().unwrap();
    let keys: Vec<String> = inner
      .buffers
      .keys()
      .filter(|k| k.starts_with(&prefix))
      .cloned()
      .collect();
    for key in keys {
      if let Some(buffer) = inner.buffers.remove(&key) {
        inner.total -= buffer.len();
      }
    }
  }

  /// Records currently buffered across all keys of all executions.
  pub fn total_records(&self) -> usize {
    self.inner.read().unwrap().total
  }
}

impl Default for EdgeBufferStore {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_RECORDS)
  }
}
