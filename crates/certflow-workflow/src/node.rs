use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::enums::NodeType;

/// A node in the nested authoring form.
///
/// Each node owns its successor and its branch sub-chains, so a whole
/// workflow is a single tree rooted at its `start` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(rename = "type")]
  pub node_type: NodeType,
  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub config: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next: Option<Box<NodeDef>>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub branches: Vec<NodeDef>,
}

impl NodeDef {
  pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
    let id = id.into();
    Self {
      name: id.clone(),
      id,
      node_type,
      config: Map::new(),
      next: None,
      branches: Vec::new(),
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Replace the config map. Non-object values leave the config empty.
  pub fn with_config(mut self, config: Value) -> Self {
    self.config = match config {
      Value::Object(map) => map,
      _ => Map::new(),
    };
    self
  }

  pub fn with_next(mut self, next: NodeDef) -> Self {
    self.next = Some(Box::new(next));
    self
  }

  pub fn with_branches(mut self, branches: Vec<NodeDef>) -> Self {
    self.branches = branches;
    self
  }

  /// Append `next` at the end of this node's chain.
  pub fn then(mut self, next: NodeDef) -> Self {
    let tail = match self.next.take() {
      Some(current) => (*current).then(next),
      None => next,
    };
    self.next = Some(Box::new(tail));
    self
  }
}
