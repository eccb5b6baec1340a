//! Runtime error types.

use certflow_acme::AcmeError;
use certflow_expr::ExprError;
use certflow_workflow::WorkflowError;

/// Errors a node processor can fail with.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
  /// The run was cancelled while the node was working.
  #[error("cancelled")]
  Cancelled,

  /// The node's config is invalid.
  #[error(transparent)]
  Config(#[from] WorkflowError),

  /// A condition expression could not be evaluated.
  #[error("condition evaluation failed: {0}")]
  Expr(#[from] ExprError),

  #[error(transparent)]
  Acme(#[from] AcmeError),

  #[error(transparent)]
  Store(#[from] certflow_store::Error),

  /// A deployer, notifier or inspector reported a failure.
  #[error("{provider}: {message}")]
  Provider { provider: String, message: String },

  #[error("{0}")]
  Failed(String),
}

impl NodeError {
  pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Provider {
      provider: provider.into(),
      message: message.into(),
    }
  }

  /// Whether the failure is a cancellation rather than an application error.
  pub fn is_cancellation(&self) -> bool {
    match self {
      Self::Cancelled => true,
      Self::Acme(e) => e.is_cancellation(),
      Self::Store(e) => e.is_cancellation(),
      _ => false,
    }
  }
}

/// Errors that end a run or a chain of it.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// Execution was cancelled.
  #[error("execution cancelled")]
  Cancelled,

  /// No processor exists for the node's type.
  #[error("unsupported node type '{node_type}' for node '{node_id}'")]
  UnsupportedNodeType { node_id: String, node_type: String },

  /// A node failed and nothing routed the failure.
  #[error("node '{node_name}' failed: {source}")]
  Node {
    node_id: String,
    node_name: String,
    #[source]
    source: NodeError,
  },

  /// Invalid workflow graph structure.
  #[error("invalid graph: {0}")]
  InvalidGraph(#[from] WorkflowError),
}

impl RuntimeError {
  pub fn is_cancellation(&self) -> bool {
    match self {
      Self::Cancelled => true,
      Self::Node { source, .. } => source.is_cancellation(),
      _ => false,
    }
  }
}
