//! Seam between the dispatcher and the run interpreter.

use std::sync::Arc;

use async_trait::async_trait;
use certflow_runtime::{Invoker, RuntimeConfig, RuntimeError, Services};
use certflow_store::{RunLog, WorkflowRun};
use certflow_workflow::{NodeGraph, WorkflowError};
use tokio_util::sync::CancellationToken;

/// What executing one run produced.
#[derive(Debug)]
pub struct RunReport {
  pub logs: Vec<RunLog>,
  pub result: Result<(), RuntimeError>,
}

/// Executes the graph snapshot of a run.
#[async_trait]
pub trait RunInvoker: Send + Sync {
  async fn invoke(&self, run: &WorkflowRun, cancel: &CancellationToken) -> RunReport;
}

/// [`RunInvoker`] backed by the runtime [`Invoker`].
pub struct GraphRunInvoker {
  services: Arc<Services>,
  config: RuntimeConfig,
}

impl GraphRunInvoker {
  pub fn new(services: Arc<Services>, config: RuntimeConfig) -> Self {
    Self { services, config }
  }
}

#[async_trait]
impl RunInvoker for GraphRunInvoker {
  async fn invoke(&self, run: &WorkflowRun, cancel: &CancellationToken) -> RunReport {
    let graph = match run.detail.as_ref() {
      Some(detail) => NodeGraph::from_def(&detail.0),
      None => Err(WorkflowError::NodeNotFound("start".to_string())),
    };
    let graph = match graph {
      Ok(graph) => graph,
      Err(e) => {
        return RunReport {
          logs: Vec::new(),
          result: Err(RuntimeError::InvalidGraph(e)),
        };
      }
    };

    let mut invoker = Invoker::new(
      self.services.clone(),
      self.config.clone(),
      &run.workflow_id,
      &run.id,
    );
    let result = invoker.invoke(&graph, cancel).await;
    RunReport {
      logs: invoker.into_logs(),
      result,
    }
  }
}
