use async_trait::async_trait;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::ExecutorError;
use crate::routing::BufferedItemReader;

/// Chunk size used when a node declares none.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// A restartable, bounded, lazy sequence of records.
#[async_trait]
pub trait ItemReader: Send {
  /// Next record, or `None` when the sequence is exhausted.
  async fn read(&mut self) -> Result<Option<Value>, ExecutorError>;
}

/// Per-record transform. Returning `Ok(None)` drops the record.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
  async fn process(&self, item: Value) -> Result<Option<Value>, ExecutorError>;
}

/// Chunked side-effect sink.
#[async_trait]
pub trait ItemWriter: Send {
  async fn write(&mut self, items: &[Value]) -> Result<(), ExecutorError>;
}

/// A pluggable node implementation, registered by node type.
///
/// The engine composes the reader, processor, and writer into a
/// chunk-oriented step; the executor never sees chunk boundaries, retries,
/// or downstream routing. The defaults suit pass-through transforms: the
/// reader drains the node's default input buffer, the processor is the
/// identity, and the writer discards (the engine still forwards records
/// downstream). Sources must override [`create_reader`], sinks
/// [`create_writer`].
///
/// [`create_reader`]: NodeExecutor::create_reader
/// [`create_writer`]: NodeExecutor::create_writer
pub trait NodeExecutor: Send + Sync {
  /// The node type this executor handles, e.g. `"FileSource"`.
  fn node_type(&self) -> &str;

  /// Reject malformed node configuration before the run starts.
  fn validate(&self, _ctx: &ExecutionContext) -> Result<(), ExecutorError> {
    Ok(())
  }

  fn create_reader(&self, ctx: &ExecutionContext) -> Result<Box<dyn ItemReader>, ExecutorError> {
    Ok(Box::new(BufferedItemReader::from_default_port(ctx)))
  }

  fn create_processor(
    &self,
    _ctx: &ExecutionContext,
  ) -> Result<Box<dyn ItemProcessor>, ExecutorError> {
    Ok(Box::new(PassthroughProcessor))
  }

  fn create_writer(&self, _ctx: &ExecutionContext) -> Result<Box<dyn ItemWriter>, ExecutorError> {
    Ok(Box::new(NoopItemWriter))
  }

  fn supports_metrics(&self) -> bool {
    true
  }

  fn supports_failure_handling(&self) -> bool {
    true
  }
}

/// Identity processor.
pub struct PassthroughProcessor;

#[async_trait]
impl ItemProcessor for PassthroughProcessor {
  async fn process(&self, item: Value) -> Result<Option<Value>, ExecutorError> {
    Ok(Some(item))
  }
}

/// Writer that discards its input. Downstream routing is unaffected; the
/// engine forwards records from the processed chunk, not from the writer.
pub struct NoopItemWriter;

#[async_trait]
impl ItemWriter for NoopItemWriter {
  async fn write(&mut self, _items: &[Value]) -> Result<(), ExecutorError> {
    Ok(())
  }
}
