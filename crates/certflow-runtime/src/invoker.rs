//! Run interpreter.
//!
//! The [`Invoker`] walks a [`NodeGraph`] from its root, runs one processor
//! per node and records a [`RunLog`] entry for each. A node's failure either
//! ends the run or, when the node is followed by an `execute_result_branch`,
//! routes the walk into that branch's `execute_failure` chain.

use std::collections::HashMap;
use std::sync::Arc;

use certflow_expr::Bindings;
use certflow_store::RunLog;
use certflow_workflow::{NodeGraph, NodeType, WorkflowError, WorkflowNode};
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{BranchPolicy, RuntimeConfig};
use crate::error::RuntimeError;
use crate::log::NodeLog;
use crate::processor::{Flow, NodeContext, ProcessorRegistry};
use crate::services::Services;

/// Executes the node graph of one workflow run.
pub struct Invoker {
  services: Arc<Services>,
  config: RuntimeConfig,
  registry: ProcessorRegistry,
  workflow_id: String,
  run_id: String,
  logs: Vec<RunLog>,
}

impl Invoker {
  pub fn new(
    services: Arc<Services>,
    config: RuntimeConfig,
    workflow_id: impl Into<String>,
    run_id: impl Into<String>,
  ) -> Self {
    Self {
      services,
      config,
      registry: ProcessorRegistry,
      workflow_id: workflow_id.into(),
      run_id: run_id.into(),
      logs: Vec::new(),
    }
  }

  /// Walk the graph from its root.
  ///
  /// Returns the first error nothing routed, or [`RuntimeError::Cancelled`]
  /// once `cancel` fires between two nodes.
  #[instrument(
    name = "runtime_invoke",
    skip(self, graph, cancel),
    fields(workflow_id = %self.workflow_id, run_id = %self.run_id)
  )]
  pub async fn invoke(
    &mut self,
    graph: &NodeGraph,
    cancel: &CancellationToken,
  ) -> Result<(), RuntimeError> {
    info!(nodes = graph.len(), "workflow_started");

    let result = self
      .run_chain(graph, graph.root().id.clone(), Bindings::new(), cancel)
      .await;

    match &result {
      Ok(()) => info!("workflow_completed"),
      Err(e) if e.is_cancellation() => warn!("workflow cancelled"),
      Err(e) => error!(error = %e, "workflow_failed"),
    }
    result
  }

  /// Per-node log entries in execution order.
  pub fn logs(&self) -> &[RunLog] {
    &self.logs
  }

  pub fn into_logs(self) -> Vec<RunLog> {
    self.logs
  }

  fn run_chain<'a>(
    &'a mut self,
    graph: &'a NodeGraph,
    head: String,
    mut scope: Bindings,
    cancel: &'a CancellationToken,
  ) -> BoxFuture<'a, Result<(), RuntimeError>> {
    Box::pin(async move {
      let mut current = Some(head);
      // Where to continue once a selected result sub-chain ends.
      let mut resume: Vec<String> = Vec::new();

      loop {
        let Some(node_id) = current.take().or_else(|| resume.pop()) else {
          return Ok(());
        };
        if cancel.is_cancelled() {
          return Err(RuntimeError::Cancelled);
        }
        let node = graph
          .get(&node_id)
          .ok_or_else(|| WorkflowError::NodeNotFound(node_id.clone()))?;

        if node.node_type.is_branch_marker() {
          self.run_branches(graph, node, &scope, cancel).await?;
          current = node.next.clone();
          continue;
        }

        let result_branch = graph
          .next(node)
          .filter(|next| next.node_type == NodeType::ExecuteResultBranch);

        match self.run_node(node, &scope, cancel).await {
          Ok((outputs, flow)) => {
            scope.insert(node.id.clone(), outputs);
            if flow == Flow::SkipBranch {
              // Ends the current sub-chain only; an enclosing result branch
              // still resumes at its own `next`.
              info!(node_id = %node.id, "branch skipped");
              current = None;
              continue;
            }
            current = match result_branch {
              Some(branch) => {
                enter_result_branch(graph, branch, &NodeType::ExecuteSuccess, &mut resume)
              }
              None => node.next.clone(),
            };
          }
          Err(e) if e.is_cancellation() => return Err(e),
          Err(e) => match result_branch {
            Some(branch) => {
              warn!(node_id = %node.id, error = %e, "node failed, taking failure branch");
              current =
                enter_result_branch(graph, branch, &NodeType::ExecuteFailure, &mut resume);
            }
            None => return Err(e),
          },
        }
      }
    })
  }

  /// Run every sub-chain of a branch marker with a copy of the scope.
  async fn run_branches(
    &mut self,
    graph: &NodeGraph,
    node: &WorkflowNode,
    scope: &Bindings,
    cancel: &CancellationToken,
  ) -> Result<(), RuntimeError> {
    for head in node.branches.clone() {
      match self.run_chain(graph, head.clone(), scope.clone(), cancel).await {
        Ok(()) => {}
        Err(e) if e.is_cancellation() => return Err(e),
        Err(e) => {
          warn!(branch = %head, error = %e, "branch failed");
          if self.config.branch_policy == BranchPolicy::FailFast {
            return Err(e);
          }
        }
      }
    }
    Ok(())
  }

  /// Process one node and append its log entry whatever the outcome.
  async fn run_node(
    &mut self,
    node: &WorkflowNode,
    scope: &Bindings,
    cancel: &CancellationToken,
  ) -> Result<(HashMap<String, Value>, Flow), RuntimeError> {
    let mut log = NodeLog::new(node);

    let processor = match self.registry.processor(node) {
      Ok(processor) => processor,
      Err(e) => {
        log.fail(e.to_string());
        self.logs.push(log.into());
        return Err(e);
      }
    };

    let ctx = NodeContext {
      workflow_id: &self.workflow_id,
      run_id: &self.run_id,
      node,
      variables: scope,
      cancel,
      services: &self.services,
      config: &self.config,
    };
    let result = processor.process(&ctx, &mut log).await;

    let result = match result {
      Ok(outcome) => Ok((outcome.outputs, outcome.flow)),
      Err(source) => {
        log.fail(source.to_string());
        Err(RuntimeError::Node {
          node_id: node.id.clone(),
          node_name: node.display_name().to_string(),
          source,
        })
      }
    };
    self.logs.push(log.into());
    result
  }
}

/// Push the result branch's successor as the resume point and return the
/// head of the selected sub-chain.
fn enter_result_branch(
  graph: &NodeGraph,
  branch: &WorkflowNode,
  kind: &NodeType,
  resume: &mut Vec<String>,
) -> Option<String> {
  resume.extend(branch.next.clone());
  graph.result_branch(branch, kind).map(|head| head.id.clone())
}
