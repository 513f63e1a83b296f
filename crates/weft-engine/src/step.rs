//! Chunk-oriented step execution.
//!
//! A step reads items in chunks, processes them one by one, hands the
//! surviving items to the executor's writer, and then forwards them into
//! the downstream edge buffers. Failures retry the current chunk up to the
//! node's retry budget; a skip policy drops individual bad records instead.
//! The cancellation token is observed between chunks: the running chunk
//! always finishes.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use weft_executor::{
  DEFAULT_CHUNK_SIZE, ExecutionContext, ExecutorError, ItemProcessor, ItemWriter, NodeExecutor,
};
use weft_plan::StepNode;

use crate::error::EngineError;

/// Record counters for a completed step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStats {
  pub records_processed: u64,
  pub records_skipped: u64,
}

/// Drive one chunk-oriented step to completion.
///
/// `retry_count` accumulates chunk retries and stays meaningful even when
/// the step ultimately fails.
pub async fn run_chunked_step(
  step: &StepNode,
  executor: &dyn NodeExecutor,
  ctx: &ExecutionContext,
  cancel: &CancellationToken,
  retry_count: &mut u32,
) -> Result<StepStats, EngineError> {
  let node_id = step.node_id.as_str();
  let fail = |source: ExecutorError| EngineError::Step {
    node_id: node_id.to_string(),
    source,
  };

  executor.validate(ctx).map_err(fail)?;

  let chunk_size = step
    .execution_hints
    .as_ref()
    .and_then(|h| h.chunk_size)
    .unwrap_or(DEFAULT_CHUNK_SIZE)
    .max(1);
  let failure_handling = executor.supports_failure_handling();
  let max_retries = if failure_handling { step.max_retries() } else { 0 };
  let skip_records = failure_handling && step.skips_records();

  let mut reader = executor.create_reader(ctx).map_err(fail)?;
  let processor = executor.create_processor(ctx).map_err(fail)?;
  let mut writer = executor.create_writer(ctx).map_err(fail)?;
  let routing = ctx.routing();

  let mut stats = StepStats::default();

  loop {
    if cancel.is_cancelled() {
      return Err(EngineError::Cancelled);
    }

    let mut chunk = Vec::with_capacity(chunk_size);
    while chunk.len() < chunk_size {
      match reader.read().await.map_err(fail)? {
        Some(item) => chunk.push(item),
        None => break,
      }
    }
    if chunk.is_empty() {
      break;
    }

    // Process and write, retrying the whole chunk on failure.
    let mut attempts: u32 = 0;
    let (written, skipped) = loop {
      match attempt_chunk(&chunk, processor.as_ref(), writer.as_mut(), skip_records, node_id).await
      {
        Ok(result) => break result,
        Err(source) if attempts < max_retries => {
          attempts += 1;
          *retry_count += 1;
          warn!(
            node_id,
            attempt = attempts,
            max_retries,
            error = %source,
            "chunk failed, retrying"
          );
        }
        Err(source) => return Err(fail(source)),
      }
    };

    // Forward the surviving records downstream. Routing sits outside the
    // retried section so a retry never duplicates buffered records.
    if routing.has_data_ports() {
      for item in &written {
        routing.dispatch(item).map_err(fail)?;
      }
    }

    stats.records_processed += written.len() as u64;
    stats.records_skipped += skipped;
  }

  Ok(stats)
}

/// One attempt at a chunk: process every item, then write the survivors.
async fn attempt_chunk(
  chunk: &[Value],
  processor: &dyn ItemProcessor,
  writer: &mut dyn ItemWriter,
  skip_records: bool,
  node_id: &str,
) -> Result<(Vec<Value>, u64), ExecutorError> {
  let mut written = Vec::with_capacity(chunk.len());
  let mut skipped = 0u64;

  for item in chunk {
    match processor.process(item.clone()).await {
      Ok(Some(value)) => written.push(value),
      Ok(None) => {}
      Err(error) if skip_records && error.is_skippable() => {
        warn!(node_id, error = %error, "record skipped by failure policy");
        skipped += 1;
      }
      Err(error) => return Err(error),
    }
  }

  writer.write(&written).await?;
  Ok((written, skipped))
}
