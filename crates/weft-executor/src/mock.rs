//! Deterministic in-memory executors.
//!
//! Used by the engine tests and the CLI demo registry where real node
//! implementations (files, databases, brokers) are unavailable or
//! irrelevant. Each constructor takes the node type to register under, so
//! one implementation can stand in for many authored types.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::traits::{ItemProcessor, ItemReader, ItemWriter, NodeExecutor};

/// Source that reads the records listed under the node's `records` config
/// key.
pub struct RecordListSource {
  node_type: String,
}

/// A source emitting the `records` array from its node config.
pub fn source(node_type: impl Into<String>) -> Arc<RecordListSource> {
  Arc::new(RecordListSource {
    node_type: node_type.into(),
  })
}

impl NodeExecutor for RecordListSource {
  fn node_type(&self) -> &str {
    &self.node_type
  }

  fn validate(&self, ctx: &ExecutionContext) -> Result<(), ExecutorError> {
    match ctx.config().get("records") {
      Some(Value::Array(_)) => Ok(()),
      Some(_) => Err(ExecutorError::invalid_config(
        ctx.node_id(),
        "'records' must be an array",
      )),
      None => Err(ExecutorError::invalid_config(
        ctx.node_id(),
        "missing 'records' array",
      )),
    }
  }

  fn create_reader(&self, ctx: &ExecutionContext) -> Result<Box<dyn ItemReader>, ExecutorError> {
    let records: VecDeque<Value> = ctx
      .config()
      .get("records")
      .and_then(Value::as_array)
      .cloned()
      .unwrap_or_default()
      .into();
    Ok(Box::new(VecItemReader { records }))
  }
}

struct VecItemReader {
  records: VecDeque<Value>,
}

#[async_trait]
impl ItemReader for VecItemReader {
  async fn read(&mut self) -> Result<Option<Value>, ExecutorError> {
    Ok(self.records.pop_front())
  }
}

/// Pass-through node: buffered input, identity transform, no side effects.
pub struct Passthrough {
  node_type: String,
}

pub fn passthrough(node_type: impl Into<String>) -> Arc<Passthrough> {
  Arc::new(Passthrough {
    node_type: node_type.into(),
  })
}

impl NodeExecutor for Passthrough {
  fn node_type(&self) -> &str {
    &self.node_type
  }
}

/// Sink that collects written records for later assertions.
pub struct CollectingSink {
  node_type: String,
  records: Arc<Mutex<Vec<Value>>>,
}

pub fn sink(node_type: impl Into<String>) -> Arc<CollectingSink> {
  Arc::new(CollectingSink {
    node_type: node_type.into(),
    records: Arc::new(Mutex::new(Vec::new())),
  })
}

impl CollectingSink {
  /// Everything written so far, in write order.
  pub fn records(&self) -> Vec<Value> {
    self.records.lock().unwrap().clone()
  }
}

impl NodeExecutor for CollectingSink {
  fn node_type(&self) -> &str {
    &self.node_type
  }

  fn create_writer(&self, _ctx: &ExecutionContext) -> Result<Box<dyn ItemWriter>, ExecutorError> {
    Ok(Box::new(CollectingWriter {
      records: self.records.clone(),
    }))
  }
}

struct CollectingWriter {
  records: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl ItemWriter for CollectingWriter {
  async fn write(&mut self, items: &[Value]) -> Result<(), ExecutorError> {
    self.records.lock().unwrap().extend(items.iter().cloned());
    Ok(())
  }
}

/// Pass-through node whose processor fails a scripted number of times
/// before succeeding. Drives retry and skip-policy tests.
pub struct Flaky {
  node_type: String,
  remaining_failures: Arc<Mutex<u32>>,
  attempts: Arc<Mutex<u32>>,
}

pub fn flaky(node_type: impl Into<String>, failures: u32) -> Arc<Flaky> {
  Arc::new(Flaky {
    node_type: node_type.into(),
    remaining_failures: Arc::new(Mutex::new(failures)),
    attempts: Arc::new(Mutex::new(0)),
  })
}

impl Flaky {
  /// Total `process` calls observed.
  pub fn attempts(&self) -> u32 {
    *self.attempts.lock().unwrap()
  }
}

impl NodeExecutor for Flaky {
  fn node_type(&self) -> &str {
    &self.node_type
  }

  fn create_processor(
    &self,
    ctx: &ExecutionContext,
  ) -> Result<Box<dyn ItemProcessor>, ExecutorError> {
    Ok(Box::new(FlakyProcessor {
      node_id: ctx.node_id().to_string(),
      remaining_failures: self.remaining_failures.clone(),
      attempts: self.attempts.clone(),
    }))
  }
}

struct FlakyProcessor {
  node_id: String,
  remaining_failures: Arc<Mutex<u32>>,
  attempts: Arc<Mutex<u32>>,
}

#[async_trait]
impl ItemProcessor for FlakyProcessor {
  async fn process(&self, item: Value) -> Result<Option<Value>, ExecutorError> {
    *self.attempts.lock().unwrap() += 1;
    let mut remaining = self.remaining_failures.lock().unwrap();
    if *remaining > 0 {
      *remaining -= 1;
      return Err(ExecutorError::item(&self.node_id, "scripted failure"));
    }
    Ok(Some(item))
  }
}
