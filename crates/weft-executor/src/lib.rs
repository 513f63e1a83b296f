//! Weft Executor
//!
//! The contract between the engine and pluggable node implementations.
//! Executors are registered by node type and consumed strictly through
//! [`NodeExecutor`]: a restartable item reader, a per-item processor, and a
//! chunked writer. The engine owns chunking, retry, skip, and the routing of
//! written records into downstream edge buffers.
//!
//! The [`mock`] module ships deterministic in-memory executors used by the
//! engine tests and the CLI demo registry.

mod context;
mod error;
pub mod mock;
mod registry;
mod routing;
mod traits;

pub use context::ExecutionContext;
pub use error::ExecutorError;
pub use registry::ExecutorRegistry;
pub use routing::{BufferedItemReader, ROUTE_PORT_KEY, RoutingContext, RoutingItemWriter};
pub use traits::{
  DEFAULT_CHUNK_SIZE, ItemProcessor, ItemReader, ItemWriter, NodeExecutor, NoopItemWriter,
  PassthroughProcessor,
};
