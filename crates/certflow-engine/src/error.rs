use certflow_workflow::WorkflowError;

/// Errors returned by the dispatcher and the engine facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// A work item without a workflow or run id.
  #[error("invalid work item: {0}")]
  InvalidWorkItem(String),

  /// Scheduled triggers only start enabled workflows.
  #[error("workflow '{0}' is disabled")]
  WorkflowDisabled(String),

  #[error("workflow '{0}' has no committed content")]
  NoContent(String),

  #[error("invalid workflow graph: {0}")]
  InvalidGraph(#[from] WorkflowError),

  #[error(transparent)]
  Store(#[from] certflow_store::Error),

  /// The dispatcher no longer accepts work.
  #[error("dispatcher is shut down")]
  ShutDown,
}

impl EngineError {
  pub fn is_cancellation(&self) -> bool {
    match self {
      Self::Store(e) => e.is_cancellation(),
      Self::ShutDown => true,
      _ => false,
    }
  }
}
