//! Node processors: one implementation per node type.

mod apply;
mod condition;
mod deploy;
mod marker;
mod monitor;
mod notify;
mod upload;

use std::collections::HashMap;

use async_trait::async_trait;
use certflow_expr::Bindings;
use certflow_store::{Json, OutputValue, WorkflowOutput};
use certflow_workflow::{NodeType, WorkflowNode};
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::error::{NodeError, RuntimeError};
use crate::log::NodeLog;
use crate::services::Services;

pub use apply::ApplyProcessor;
pub use condition::ConditionProcessor;
pub use deploy::DeployProcessor;
pub use marker::MarkerProcessor;
pub use monitor::MonitorProcessor;
pub use notify::NotifyProcessor;
pub use upload::UploadProcessor;

/// Everything a processor sees of the run it is part of.
pub struct NodeContext<'a> {
  pub workflow_id: &'a str,
  pub run_id: &'a str,
  pub node: &'a WorkflowNode,
  /// Outputs of the nodes that ran before this one on its chain.
  pub variables: &'a Bindings,
  pub cancel: &'a CancellationToken,
  pub services: &'a Services,
  pub config: &'a RuntimeConfig,
}

/// Whether the walk continues past a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
  #[default]
  Continue,
  /// End the current chain without failing it.
  SkipBranch,
}

/// Successful result of processing a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutcome {
  pub outputs: HashMap<String, Value>,
  pub flow: Flow,
}

impl NodeOutcome {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn skip_branch() -> Self {
    Self {
      flow: Flow::SkipBranch,
      ..Self::default()
    }
  }

  pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.outputs.insert(name.into(), value.into());
    self
  }
}

#[async_trait]
pub trait NodeProcessor: Send + Sync {
  async fn process(&self, ctx: &NodeContext<'_>, log: &mut NodeLog)
  -> Result<NodeOutcome, NodeError>;
}

/// Maps node types to their processors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessorRegistry;

impl ProcessorRegistry {
  /// The processor for `node`. Branch markers are walked by the interpreter
  /// and have none.
  pub fn processor(&self, node: &WorkflowNode) -> Result<Box<dyn NodeProcessor>, RuntimeError> {
    let processor: Box<dyn NodeProcessor> = match &node.node_type {
      NodeType::Start | NodeType::End | NodeType::ExecuteSuccess | NodeType::ExecuteFailure => {
        Box::new(MarkerProcessor)
      }
      NodeType::Apply => Box::new(ApplyProcessor),
      NodeType::Upload => Box::new(UploadProcessor),
      NodeType::Deploy => Box::new(DeployProcessor),
      NodeType::Notify => Box::new(NotifyProcessor),
      NodeType::Condition => Box::new(ConditionProcessor),
      NodeType::Monitor | NodeType::Inspect => Box::new(MonitorProcessor),
      NodeType::Branch | NodeType::ExecuteResultBranch | NodeType::Unknown(_) => {
        return Err(RuntimeError::UnsupportedNodeType {
          node_id: node.id.clone(),
          node_type: node.node_type.to_string(),
        });
      }
    };
    Ok(processor)
  }
}

/// Upsert the node's output row after it succeeded.
async fn save_output(ctx: &NodeContext<'_>, outputs: &NodeOutcome) -> Result<(), NodeError> {
  let now = Utc::now();
  let mut values: Vec<OutputValue> = outputs
    .outputs
    .iter()
    .map(|(name, value)| OutputValue {
      name: name.clone(),
      value: value.clone(),
    })
    .collect();
  values.sort_by(|a, b| a.name.cmp(&b.name));

  let output = WorkflowOutput {
    id: uuid::Uuid::new_v4().to_string(),
    workflow_id: ctx.workflow_id.to_string(),
    run_id: ctx.run_id.to_string(),
    node_id: ctx.node.id.clone(),
    node_config: Json(ctx.node.config.clone()),
    outputs: Json(values),
    succeeded: true,
    created_at: now,
    updated_at: now,
  };
  ctx.services.repositories.outputs.save_output(&output).await?;
  Ok(())
}
