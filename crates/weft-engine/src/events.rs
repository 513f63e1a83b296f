//! Execution events and notifiers for observability.
//!
//! Events are emitted during workflow execution to allow consumers to
//! observe progress, persist state, stream to UIs, etc. The coordinator
//! attaches a [`ChannelNotifier`] whose receiver feeds the persistence
//! task.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted during workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// Workflow execution has started.
  WorkflowStarted {
    execution_id: String,
    workflow_id: String,
  },

  /// A step has started executing.
  NodeStarted {
    execution_id: String,
    node_id: String,
    node_type: String,
  },

  /// A step has completed successfully.
  NodeCompleted {
    execution_id: String,
    node_id: String,
    node_type: String,
    records_processed: u64,
    duration_ms: u64,
    retry_count: u32,
  },

  /// A step has failed (after exhausting its retries).
  NodeFailed {
    execution_id: String,
    node_id: String,
    node_type: String,
    error: String,
    retry_count: u32,
  },

  /// Workflow execution has completed successfully.
  WorkflowCompleted { execution_id: String },

  /// Workflow execution has failed.
  WorkflowFailed { execution_id: String, error: String },

  /// Workflow execution was cancelled cooperatively.
  WorkflowCancelled { execution_id: String },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event - implementations decide what
/// to do with them (persist, broadcast, log, ignore, etc.).
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Event volume is low (a handful per node), so an unbounded channel keeps
/// the engine from blocking on a slow consumer.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
