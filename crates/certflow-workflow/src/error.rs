use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("duplicate node id: {0}")]
  DuplicateNode(String),

  #[error("node '{from}' references unknown node '{to}'")]
  DanglingReference { from: String, to: String },

  #[error("node '{0}' is owned by more than one parent")]
  MultipleParents(String),

  #[error("node '{0}' is not reachable from the root node")]
  Unreachable(String),

  #[error("node '{node_id}' of type '{node_type}' cannot own branches")]
  UnexpectedBranches { node_id: String, node_type: String },

  #[error("invalid result branch '{node_id}': {message}")]
  InvalidResultBranch { node_id: String, message: String },

  #[error("unknown workflow trigger: {0}")]
  UnknownTrigger(String),

  #[error("invalid config for node '{node_id}': {message}")]
  InvalidConfig { node_id: String, message: String },
}

impl WorkflowError {
  pub(crate) fn invalid_config(node_id: &str, message: impl Into<String>) -> Self {
    Self::InvalidConfig {
      node_id: node_id.to_string(),
      message: message.into(),
    }
  }
}
