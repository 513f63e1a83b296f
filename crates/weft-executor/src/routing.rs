//! Record routing between nodes.
//!
//! A step's output records travel to downstream edge buffers through a
//! [`RoutingContext`] built from the step's output ports. Records carrying a
//! `_routePort` key are dispatched to the matching named port; everything
//! else goes to the default. Downstream steps read their input back through
//! a [`BufferedItemReader`].

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use weft_buffer::EdgeBufferStore;
use weft_plan::OutputPort;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::traits::{ItemReader, ItemWriter};

/// Record key inspected for an explicit route.
pub const ROUTE_PORT_KEY: &str = "_routePort";

const DEFAULT_PORT: &str = "out";
const FALLBACK_PORT: &str = "default";

/// Dispatches a step's output records to downstream edge buffers.
#[derive(Clone)]
pub struct RoutingContext {
  execution_id: String,
  source_node_id: String,
  output_ports: Vec<OutputPort>,
  buffers: EdgeBufferStore,
}

impl RoutingContext {
  pub fn new(
    execution_id: impl Into<String>,
    source_node_id: impl Into<String>,
    output_ports: Vec<OutputPort>,
    buffers: EdgeBufferStore,
  ) -> Self {
    Self {
      execution_id: execution_id.into(),
      source_node_id: source_node_id.into(),
      output_ports,
      buffers,
    }
  }

  pub fn source_node_id(&self) -> &str {
    &self.source_node_id
  }

  /// Whether this node has any data output at all.
  pub fn has_data_ports(&self) -> bool {
    self.data_ports().next().is_some()
  }

  /// Route one record by an explicit key.
  ///
  /// The record goes to the data ports named `route_key`; with no such
  /// port it falls back to the port named `default`, then to the default
  /// route.
  pub fn route_record(&self, record: &Value, route_key: &str) -> Result<(), ExecutorError> {
    if self.forward_to_named(route_key, record)? {
      return Ok(());
    }
    if self.forward_to_named(FALLBACK_PORT, record)? {
      return Ok(());
    }
    self.route_to_default(record)
  }

  /// Route one record to the ports named `out`, or to every data port when
  /// none is (a broadcast, e.g. a replicate node fanning out).
  pub fn route_to_default(&self, record: &Value) -> Result<(), ExecutorError> {
    if self.forward_to_named(DEFAULT_PORT, record)? {
      return Ok(());
    }
    let ports: Vec<OutputPort> = self.data_ports().cloned().collect();
    for port in &ports {
      self.forward(port, record)?;
    }
    Ok(())
  }

  /// Route one record, honoring its `_routePort` key when present.
  pub fn dispatch(&self, record: &Value) -> Result<(), ExecutorError> {
    match record.get(ROUTE_PORT_KEY).and_then(Value::as_str) {
      Some(route_key) => self.route_record(record, route_key),
      None => self.route_to_default(record),
    }
  }

  fn data_ports(&self) -> impl Iterator<Item = &OutputPort> {
    self.output_ports.iter().filter(|p| !p.is_control)
  }

  /// Forward to every data port with the given name; `false` when none
  /// matched.
  fn forward_to_named(&self, source_port: &str, record: &Value) -> Result<bool, ExecutorError> {
    let ports: Vec<OutputPort> = self
      .data_ports()
      .filter(|p| p.source_port == source_port)
      .cloned()
      .collect();
    for port in &ports {
      self.forward(port, record)?;
    }
    Ok(!ports.is_empty())
  }

  fn forward(&self, port: &OutputPort, record: &Value) -> Result<(), ExecutorError> {
    self.buffers.add(
      &self.execution_id,
      &port.target_node_id,
      &port.target_port,
      record.clone(),
    )?;
    Ok(())
  }
}

/// Writer that routes every written item instead of producing side effects.
pub struct RoutingItemWriter {
  routing: RoutingContext,
}

impl RoutingItemWriter {
  pub fn new(routing: RoutingContext) -> Self {
    Self { routing }
  }
}

#[async_trait]
impl ItemWriter for RoutingItemWriter {
  async fn write(&mut self, items: &[Value]) -> Result<(), ExecutorError> {
    for item in items {
      self.routing.dispatch(item)?;
    }
    Ok(())
  }
}

/// Reader over the records buffered for one `(node, port)` input.
///
/// The buffer is snapshotted at construction; the store keeps the records
/// until the execution is cleaned up, so a restarted step re-reads the same
/// sequence.
pub struct BufferedItemReader {
  records: VecDeque<Value>,
}

impl BufferedItemReader {
  pub fn new(buffers: &EdgeBufferStore, execution_id: &str, node_id: &str, port: &str) -> Self {
    Self {
      records: buffers.get(execution_id, node_id, port).into(),
    }
  }

  /// Reader over the node's default `in` port.
  pub fn from_default_port(ctx: &ExecutionContext) -> Self {
    Self::new(ctx.buffers(), ctx.execution_id(), ctx.node_id(), "in")
  }
}

#[async_trait]
impl ItemReader for BufferedItemReader {
  async fn read(&mut self) -> Result<Option<Value>, ExecutorError> {
    Ok(self.records.pop_front())
  }
}
