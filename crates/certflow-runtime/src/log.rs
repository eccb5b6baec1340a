use certflow_store::{LogLevel, RunLog, RunLogRecord};
use certflow_workflow::WorkflowNode;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Per-node log a processor writes into while it runs.
///
/// Every record is mirrored to `tracing`; the interpreter persists the whole
/// entry as a [`RunLog`] once the node finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLog {
  node_id: String,
  node_name: String,
  records: Vec<RunLogRecord>,
  error: Option<String>,
}

impl NodeLog {
  pub fn new(node: &WorkflowNode) -> Self {
    Self {
      node_id: node.id.clone(),
      node_name: node.display_name().to_string(),
      records: Vec::new(),
      error: None,
    }
  }

  pub fn debug(&mut self, message: impl Into<String>) {
    self.record(LogLevel::Debug, message.into(), None);
  }

  pub fn info(&mut self, message: impl Into<String>) {
    self.record(LogLevel::Info, message.into(), None);
  }

  pub fn warn(&mut self, message: impl Into<String>) {
    self.record(LogLevel::Warn, message.into(), None);
  }

  /// An info record carrying structured data.
  pub fn info_with(&mut self, message: impl Into<String>, data: Value) {
    self.record(LogLevel::Info, message.into(), Some(data));
  }

  /// Mark the node failed.
  pub fn fail(&mut self, message: impl Into<String>) {
    let message = message.into();
    self.record(LogLevel::Error, message.clone(), None);
    self.error = Some(message);
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn records(&self) -> &[RunLogRecord] {
    &self.records
  }

  fn record(&mut self, level: LogLevel, message: String, data: Option<Value>) {
    let node_id = self.node_id.as_str();
    match level {
      LogLevel::Debug => debug!(node_id, "{message}"),
      LogLevel::Info => info!(node_id, "{message}"),
      LogLevel::Warn => warn!(node_id, "{message}"),
      LogLevel::Error => error!(node_id, "{message}"),
    }
    self.records.push(RunLogRecord {
      time: Utc::now(),
      level,
      message,
      data,
    });
  }
}

impl From<NodeLog> for RunLog {
  fn from(log: NodeLog) -> Self {
    RunLog {
      node_id: log.node_id,
      node_name: log.node_name,
      records: log.records,
      error: log.error,
    }
  }
}
