use thiserror::Error;

/// Errors raised by node executors and record routing.
#[derive(Debug, Error)]
pub enum ExecutorError {
  /// A node's configuration is missing or malformed.
  #[error("invalid configuration for node '{node_id}': {message}")]
  InvalidConfig { node_id: String, message: String },

  /// A single record could not be read, processed, or written.
  ///
  /// This is the only error kind a skip policy may swallow; everything
  /// else always fails the step.
  #[error("record error in node '{node_id}': {message}")]
  Item { node_id: String, message: String },

  /// A downstream edge buffer rejected a record.
  #[error(transparent)]
  Buffer(#[from] weft_buffer::BufferError),

  /// No executor is registered for the node type.
  #[error("no executor registered for node type '{node_type}'")]
  UnknownType { node_type: String },
}

impl ExecutorError {
  pub fn invalid_config(node_id: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidConfig {
      node_id: node_id.into(),
      message: message.into(),
    }
  }

  pub fn item(node_id: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Item {
      node_id: node_id.into(),
      message: message.into(),
    }
  }

  /// Whether a skip policy may drop the offending record and continue.
  pub fn is_skippable(&self) -> bool {
    matches!(self, Self::Item { .. })
  }
}
