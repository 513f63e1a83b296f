use serde_json::Value;
use weft_buffer::EdgeBufferStore;
use weft_plan::StepNode;

use crate::routing::{BufferedItemReader, RoutingContext};

/// Everything an executor sees while building its reader, processor, and
/// writer for one step of one execution.
#[derive(Clone)]
pub struct ExecutionContext {
  execution_id: String,
  step: StepNode,
  buffers: EdgeBufferStore,
}

impl ExecutionContext {
  pub fn new(execution_id: impl Into<String>, step: StepNode, buffers: EdgeBufferStore) -> Self {
    Self {
      execution_id: execution_id.into(),
      step,
      buffers,
    }
  }

  pub fn execution_id(&self) -> &str {
    &self.execution_id
  }

  pub fn node_id(&self) -> &str {
    &self.step.node_id
  }

  pub fn node_type(&self) -> &str {
    &self.step.node_type
  }

  /// The node's opaque configuration tree.
  pub fn config(&self) -> &Value {
    &self.step.config
  }

  pub fn step(&self) -> &StepNode {
    &self.step
  }

  pub fn buffers(&self) -> &EdgeBufferStore {
    &self.buffers
  }

  /// Reader over the records buffered for one of this node's input ports.
  pub fn buffered_reader(&self, port: &str) -> BufferedItemReader {
    BufferedItemReader::new(&self.buffers, &self.execution_id, &self.step.node_id, port)
  }

  /// Routing context over this node's output ports.
  pub fn routing(&self) -> RoutingContext {
    RoutingContext::new(
      &self.execution_id,
      &self.step.node_id,
      self.step.output_ports.clone(),
      self.buffers.clone(),
    )
  }
}
