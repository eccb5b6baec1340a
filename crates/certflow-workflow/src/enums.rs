use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// How a workflow run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTrigger {
  Manual,
  Scheduled,
}

impl WorkflowTrigger {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Manual => "manual",
      Self::Scheduled => "scheduled",
    }
  }
}

impl TryFrom<String> for WorkflowTrigger {
  type Error = WorkflowError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    match value.as_str() {
      "manual" => Ok(Self::Manual),
      "scheduled" => Ok(Self::Scheduled),
      _ => Err(WorkflowError::UnknownTrigger(value)),
    }
  }
}

impl fmt::Display for WorkflowTrigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Node type tag.
///
/// Unrecognized tags load as [`NodeType::Unknown`] and are rejected when the
/// interpreter looks up a processor for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
  Start,
  End,
  Apply,
  Upload,
  Deploy,
  Notify,
  Branch,
  Condition,
  ExecuteResultBranch,
  ExecuteSuccess,
  ExecuteFailure,
  Monitor,
  Inspect,
  Unknown(String),
}

impl NodeType {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Start => "start",
      Self::End => "end",
      Self::Apply => "apply",
      Self::Upload => "upload",
      Self::Deploy => "deploy",
      Self::Notify => "notify",
      Self::Branch => "branch",
      Self::Condition => "condition",
      Self::ExecuteResultBranch => "execute_result_branch",
      Self::ExecuteSuccess => "execute_success",
      Self::ExecuteFailure => "execute_failure",
      Self::Monitor => "monitor",
      Self::Inspect => "inspect",
      Self::Unknown(tag) => tag,
    }
  }

  /// Types that own branch sub-chains instead of doing work themselves.
  pub fn is_branch_marker(&self) -> bool {
    matches!(self, Self::Branch | Self::ExecuteResultBranch)
  }

  /// Types whose output is a certificate other nodes can deploy.
  pub fn produces_certificate(&self) -> bool {
    matches!(self, Self::Apply | Self::Upload)
  }
}

impl From<String> for NodeType {
  fn from(tag: String) -> Self {
    match tag.as_str() {
      "start" => Self::Start,
      "end" => Self::End,
      "apply" => Self::Apply,
      "upload" => Self::Upload,
      "deploy" => Self::Deploy,
      "notify" => Self::Notify,
      "branch" => Self::Branch,
      "condition" => Self::Condition,
      "execute_result_branch" => Self::ExecuteResultBranch,
      "execute_success" => Self::ExecuteSuccess,
      "execute_failure" => Self::ExecuteFailure,
      "monitor" => Self::Monitor,
      "inspect" => Self::Inspect,
      _ => Self::Unknown(tag),
    }
  }
}

impl From<NodeType> for String {
  fn from(node_type: NodeType) -> Self {
    node_type.as_str().to_string()
  }
}

impl fmt::Display for NodeType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
