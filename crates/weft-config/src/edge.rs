use serde::{Deserialize, Serialize};

/// Default output port when an edge does not name one.
pub const DEFAULT_SOURCE_PORT: &str = "out";
/// Default input port when an edge does not name one.
pub const DEFAULT_TARGET_PORT: &str = "in";

/// A directed link between two nodes.
///
/// Control edges carry ordering only; data edges carry records between the
/// named ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
  pub source: String,
  pub target: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_handle: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_handle: Option<String>,
  #[serde(default)]
  pub is_control: bool,
}

impl Edge {
  /// Data edge with default ports.
  pub fn data(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      source: source.into(),
      target: target.into(),
      source_handle: None,
      target_handle: None,
      is_control: false,
    }
  }

  /// Control edge (ordering only, no records).
  pub fn control(source: impl Into<String>, target: impl Into<String>) -> Self {
    Self {
      is_control: true,
      ..Self::data(source, target)
    }
  }

  /// Output port name, defaulting to `"out"`.
  pub fn source_port(&self) -> &str {
    self.source_handle.as_deref().unwrap_or(DEFAULT_SOURCE_PORT)
  }

  /// Input port name, defaulting to `"in"`.
  pub fn target_port(&self) -> &str {
    self.target_handle.as_deref().unwrap_or(DEFAULT_TARGET_PORT)
  }
}
