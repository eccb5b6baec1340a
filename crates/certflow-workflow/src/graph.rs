use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{ConditionNodeConfig, DeployNodeConfig};
use crate::enums::NodeType;
use crate::error::WorkflowError;
use crate::node::NodeDef;

/// A node in the arena. Links to other nodes are ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub node_type: NodeType,
  #[serde(default)]
  pub config: Map<String, Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub branches: Vec<String>,
}

impl WorkflowNode {
  /// Decode the config map into the typed config of this node.
  pub fn config<T: DeserializeOwned>(&self) -> Result<T, WorkflowError> {
    serde_json::from_value(Value::Object(self.config.clone()))
      .map_err(|e| WorkflowError::invalid_config(&self.id, e.to_string()))
  }

  pub fn display_name(&self) -> &str {
    if self.name.is_empty() {
      &self.id
    } else {
      &self.name
    }
  }
}

/// Validated node graph, addressed by node id.
///
/// Every node except the root has exactly one owner: the node whose `next`
/// points at it or the branch marker listing it in `branches`. Every node is
/// reachable from the root, so the graph is a tree and walking it always
/// terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNodeGraph")]
pub struct NodeGraph {
  root: String,
  nodes: HashMap<String, WorkflowNode>,
}

#[derive(Deserialize)]
struct RawNodeGraph {
  root: String,
  nodes: HashMap<String, WorkflowNode>,
}

impl TryFrom<RawNodeGraph> for NodeGraph {
  type Error = WorkflowError;

  fn try_from(raw: RawNodeGraph) -> Result<Self, Self::Error> {
    Self::from_parts(raw.root, raw.nodes)
  }
}

impl NodeGraph {
  /// Flatten a nested definition into the arena and validate it.
  pub fn from_def(root: &NodeDef) -> Result<Self, WorkflowError> {
    let mut nodes = HashMap::new();
    flatten_chain(root, &mut nodes)?;
    Self::from_parts(root.id.clone(), nodes)
  }

  /// Build from an already flattened arena and validate it.
  pub fn from_parts(
    root: String,
    nodes: HashMap<String, WorkflowNode>,
  ) -> Result<Self, WorkflowError> {
    let graph = Self { root, nodes };
    graph.validate()?;
    Ok(graph)
  }

  pub fn root(&self) -> &WorkflowNode {
    // validate() guarantees the root is present
    &self.nodes[&self.root]
  }

  pub fn get(&self, node_id: &str) -> Option<&WorkflowNode> {
    self.nodes.get(node_id)
  }

  pub fn next(&self, node: &WorkflowNode) -> Option<&WorkflowNode> {
    node.next.as_deref().and_then(|id| self.nodes.get(id))
  }

  /// Heads of the sub-chains owned by a branch marker, in order.
  pub fn branches<'a>(&'a self, node: &'a WorkflowNode) -> impl Iterator<Item = &'a WorkflowNode> {
    node.branches.iter().filter_map(|id| self.nodes.get(id))
  }

  /// The `execute_success` or `execute_failure` head of a result branch.
  pub fn result_branch<'a>(
    &'a self,
    node: &'a WorkflowNode,
    kind: &NodeType,
  ) -> Option<&'a WorkflowNode> {
    self.branches(node).find(|b| &b.node_type == kind)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
    self.nodes.values()
  }

  fn validate(&self) -> Result<(), WorkflowError> {
    if !self.nodes.contains_key(&self.root) {
      return Err(WorkflowError::NodeNotFound(self.root.clone()));
    }

    let mut owners: HashMap<&str, &str> = HashMap::new();
    for node in self.nodes.values() {
      if !node.branches.is_empty() && !node.node_type.is_branch_marker() {
        return Err(WorkflowError::UnexpectedBranches {
          node_id: node.id.clone(),
          node_type: node.node_type.to_string(),
        });
      }

      for child in node.next.iter().chain(node.branches.iter()) {
        if !self.nodes.contains_key(child) {
          return Err(WorkflowError::DanglingReference {
            from: node.id.clone(),
            to: child.clone(),
          });
        }
        if child == &self.root || owners.insert(child, &node.id).is_some() {
          return Err(WorkflowError::MultipleParents(child.clone()));
        }
      }

      if node.node_type == NodeType::ExecuteResultBranch {
        self.validate_result_branch(node)?;
      }
    }

    self.validate_reachability()?;
    self.validate_configs()
  }

  fn validate_result_branch(&self, node: &WorkflowNode) -> Result<(), WorkflowError> {
    let count = |kind: NodeType| {
      node
        .branches
        .iter()
        .filter(|id| self.nodes.get(*id).is_some_and(|b| b.node_type == kind))
        .count()
    };

    let successes = count(NodeType::ExecuteSuccess);
    let failures = count(NodeType::ExecuteFailure);
    if successes != 1 || failures != 1 || node.branches.len() != 2 {
      return Err(WorkflowError::InvalidResultBranch {
        node_id: node.id.clone(),
        message: format!(
          "expected one execute_success and one execute_failure branch, found {} branches ({} success, {} failure)",
          node.branches.len(),
          successes,
          failures
        ),
      });
    }
    Ok(())
  }

  fn validate_reachability(&self) -> Result<(), WorkflowError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut stack = vec![self.root.as_str()];
    while let Some(id) = stack.pop() {
      if !seen.insert(id) {
        continue;
      }
      let node = &self.nodes[id];
      stack.extend(node.next.as_deref());
      stack.extend(node.branches.iter().map(String::as_str));
    }

    match self.nodes.keys().find(|id| !seen.contains(id.as_str())) {
      Some(orphan) => Err(WorkflowError::Unreachable(orphan.clone())),
      None => Ok(()),
    }
  }

  /// Check configs that reference other nodes.
  fn validate_configs(&self) -> Result<(), WorkflowError> {
    for node in self.nodes.values() {
      match node.node_type {
        NodeType::Condition => {
          let config: ConditionNodeConfig = node.config()?;
          if let Some(expr) = &config.expression {
            for referenced in expr.referenced_nodes() {
              if !self.nodes.contains_key(referenced) {
                return Err(WorkflowError::invalid_config(
                  &node.id,
                  format!("expression references unknown node '{}'", referenced),
                ));
              }
            }
          }
        }
        NodeType::Deploy => {
          let config: DeployNodeConfig = node.config()?;
          let source = config.certificate_source(&node.id)?;
          let produces = self
            .nodes
            .get(source)
            .is_some_and(|n| n.node_type.produces_certificate());
          if !produces {
            return Err(WorkflowError::invalid_config(
              &node.id,
              format!("node '{}' does not produce a certificate", source),
            ));
          }
        }
        _ => {}
      }
    }
    Ok(())
  }
}

fn flatten_chain(
  head: &NodeDef,
  nodes: &mut HashMap<String, WorkflowNode>,
) -> Result<(), WorkflowError> {
  let mut current = Some(head);
  while let Some(def) = current {
    for branch in &def.branches {
      flatten_chain(branch, nodes)?;
    }

    let node = WorkflowNode {
      id: def.id.clone(),
      name: def.name.clone(),
      node_type: def.node_type.clone(),
      config: def.config.clone(),
      next: def.next.as_ref().map(|n| n.id.clone()),
      branches: def.branches.iter().map(|b| b.id.clone()).collect(),
    };
    if nodes.insert(def.id.clone(), node).is_some() {
      return Err(WorkflowError::DuplicateNode(def.id.clone()));
    }

    current = def.next.as_deref();
  }
  Ok(())
}
