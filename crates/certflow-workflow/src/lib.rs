//! Certflow Workflow
//!
//! This crate provides the two representations of a workflow's node graph:
//!
//! - [`NodeDef`] is the nested authoring form persisted as a workflow's
//!   `content`/`draft`: every node owns its `next` successor and its branch
//!   sub-chains by value.
//! - [`NodeGraph`] is the validated arena the interpreter walks. Nodes are
//!   addressed by id and link to each other through explicit `next` and
//!   `branches` id lists.
//!
//! Loading a [`NodeDef`] into a [`NodeGraph`] checks the structural
//! invariants (unique ids, single ownership, branch markers) and the typed
//! configuration of condition and deploy nodes.

mod config;
mod enums;
mod error;
mod graph;
mod node;

pub use config::{
  ApplyNodeConfig, ConditionNodeConfig, DeployNodeConfig, KeyAlgorithm, MonitorNodeConfig,
  NotifyNodeConfig, UploadNodeConfig,
};
pub use enums::{NodeType, WorkflowTrigger};
pub use error::WorkflowError;
pub use graph::{NodeGraph, WorkflowNode};
pub use node::NodeDef;
