//! Weft Engine
//!
//! The flow scheduler and executor: compiles a validated execution plan
//! into a runtime flow with sequential chains, parallel splits, join
//! barriers, and error transitions, then drives it against the executor
//! registry, edge buffers, and persistence store.
//!
//! Entry points:
//! - [`ExecutionCoordinator`] for the full submission lifecycle (normalize,
//!   compile, persist, run, finalize, cancel, restart)
//! - [`WorkflowEngine`] to execute an already-compiled plan
//! - [`FlowBuilder`] to inspect the runtime flow a plan compiles into

pub mod barrier;
mod coordinator;
mod engine;
mod error;
pub mod events;
mod flow;
mod step;

pub use barrier::{BarrierError, BranchTracker, JoinMetadata, MetadataBag};
pub use coordinator::{ExecutionCoordinator, RunSummary};
pub use engine::WorkflowEngine;
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use flow::{Flow, FlowBuilder, FlowElement, SplitElement, StepElement};
pub use step::{StepStats, run_chunked_step};
