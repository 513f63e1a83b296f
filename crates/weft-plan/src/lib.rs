//! Weft Plan
//!
//! This crate turns an authored [`WorkflowDefinition`] into an
//! [`ExecutionPlan`] the scheduler can run, and keeps the plan honest:
//!
//! - [`compiler`] validates the raw graph, classifies every node, derives
//!   successor/error/upstream references and output ports, and resolves
//!   fork/join targets (declared or, when permitted, inferred).
//! - [`validator`] runs the structural and semantic checks (cycles,
//!   convergence discipline, fork/join reachability, orphans) under
//!   configurable strictness.
//! - [`restart`] constructs reduced plans for partial restarts, either from
//!   an arbitrary node or from the failed nodes of a prior run.
//!
//! [`WorkflowDefinition`]: weft_config::WorkflowDefinition

pub mod compiler;
mod error;
mod plan;
pub mod restart;
mod step;
pub mod validator;

pub use compiler::{ExecutorCatalog, GraphCompiler};
pub use error::PlanError;
pub use plan::ExecutionPlan;
pub use step::{Classification, OutputPort, StepKind, StepNode, node_types};
pub use validator::{PlanValidator, ValidationReport};
