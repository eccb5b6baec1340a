use std::sync::Arc;

use certflow_runtime::Services;
use certflow_store::{Repositories, WorkflowRun};
use certflow_workflow::{NodeGraph, WorkflowTrigger};
use tracing::{info, instrument};

use crate::config::{DispatcherConfig, EngineConfig};
use crate::dispatcher::{Dispatcher, WorkflowWorkItem};
use crate::error::EngineError;
use crate::housekeeping;
use crate::invoker::{GraphRunInvoker, RunInvoker};

/// Entry point for starting, cancelling and housekeeping workflow runs.
pub struct Engine {
  repositories: Repositories,
  dispatcher: Dispatcher,
}

impl Engine {
  /// Build an engine executing runs with the runtime interpreter.
  pub fn new(config: EngineConfig, services: Arc<Services>) -> Self {
    let repositories = services.repositories.clone();
    let invoker = Arc::new(GraphRunInvoker::new(services, config.runtime));
    Self::with_invoker(config.dispatcher, repositories, invoker)
  }

  pub fn with_invoker(
    config: DispatcherConfig,
    repositories: Repositories,
    invoker: Arc<dyn RunInvoker>,
  ) -> Self {
    let dispatcher = Dispatcher::new(config, &repositories, invoker);
    Self {
      repositories,
      dispatcher,
    }
  }

  pub fn dispatcher(&self) -> &Dispatcher {
    &self.dispatcher
  }

  /// Create a `Pending` run from the workflow's committed content and queue it.
  #[instrument(skip(self, trigger), fields(trigger = %trigger))]
  pub async fn start_run(
    &self,
    workflow_id: &str,
    trigger: WorkflowTrigger,
  ) -> Result<WorkflowRun, EngineError> {
    let workflow = self.repositories.workflows.get_workflow(workflow_id).await?;
    if trigger == WorkflowTrigger::Scheduled && !workflow.enabled {
      return Err(EngineError::WorkflowDisabled(workflow.id));
    }
    let Some(content) = workflow.content.as_ref() else {
      return Err(EngineError::NoContent(workflow.id));
    };
    NodeGraph::from_def(&content.0)?;

    let run = WorkflowRun::pending(
      uuid::Uuid::new_v4().to_string(),
      &workflow.id,
      trigger,
      content.0.clone(),
    );
    self.repositories.runs.save_run(&run).await?;
    self.repositories.workflows.record_last_run(&run).await?;

    self
      .dispatcher
      .dispatch(WorkflowWorkItem::new(&workflow.id, &run.id))?;
    info!(run_id = %run.id, "run created");
    Ok(run)
  }

  pub async fn cancel_run(&self, run_id: &str) -> Result<(), EngineError> {
    self.dispatcher.cancel(run_id).await
  }

  pub async fn shutdown(&self) {
    self.dispatcher.shutdown().await;
  }

  /// Fail runs a previous process left `Pending` or `Running`.
  ///
  /// Call before dispatching anything in this process.
  pub async fn recover_interrupted_runs(&self) -> Result<usize, EngineError> {
    housekeeping::recover_interrupted_runs(&self.repositories).await
  }

  /// Delete terminal runs older than the configured retention.
  pub async fn cleanup_runs(&self) -> Result<u64, EngineError> {
    housekeeping::cleanup_runs(&self.repositories).await
  }
}
