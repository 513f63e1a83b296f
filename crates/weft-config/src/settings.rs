//! Engine settings.
//!
//! All tunables the engine reads, grouped the way operators configure them:
//!
//! ```json
//! {
//!   "compiler": { "strictJoins": true, "allowJoinInference": false },
//!   "validation": { "strictJoins": false, "strictJoinUpstreams": false,
//!                   "requireExplicitJoin": false },
//!   "job": { "restartable": true, "require-workflow-id": true },
//!   "edgeBuffer": { "maxRecords": 50000 },
//!   "scheduler": { "core": 4, "max": 16, "queue": 100 }
//! }
//! ```
//!
//! Every section and field has a default, so a partial (or absent) settings
//! document is valid.

use serde::{Deserialize, Serialize};

/// Top-level engine settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
  pub compiler: CompilerSettings,
  pub validation: ValidationSettings,
  pub job: JobSettings,
  pub edge_buffer: EdgeBufferSettings,
  pub scheduler: SchedulerSettings,
}

/// Graph compiler strictness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompilerSettings {
  /// Forks with more than one branch must declare (or infer) a join target.
  pub strict_joins: bool,
  /// Permit convergence-point inference for forks without a declared join.
  pub allow_join_inference: bool,
}

impl Default for CompilerSettings {
  fn default() -> Self {
    Self {
      strict_joins: true,
      allow_join_inference: false,
    }
  }
}

/// Plan validator strictness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationSettings {
  /// Convergence violations are errors instead of warnings.
  pub strict_joins: bool,
  /// Declared upstream steps of a join must equal its actual incomers.
  pub strict_join_upstreams: bool,
  /// Every multi-branch fork must declare its join explicitly.
  pub require_explicit_join: bool,
}

/// Job identity and restart behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobSettings {
  /// Whether a completed or failed run may be resumed.
  pub restartable: bool,
  /// Refuse workflows without an ID instead of generating a random job name.
  #[serde(rename = "require-workflow-id")]
  pub require_workflow_id: bool,
}

impl Default for JobSettings {
  fn default() -> Self {
    Self {
      restartable: true,
      require_workflow_id: true,
    }
  }
}

/// Edge buffer capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EdgeBufferSettings {
  /// Process-wide cap on buffered records, summed across all executions.
  pub max_records: usize,
}

impl Default for EdgeBufferSettings {
  fn default() -> Self {
    Self { max_records: 50_000 }
  }
}

/// Worker pool sizing for parallel splits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerSettings {
  pub core: usize,
  pub max: usize,
  pub queue: usize,
}

impl Default for SchedulerSettings {
  fn default() -> Self {
    Self {
      core: 4,
      max: 16,
      queue: 100,
    }
  }
}
