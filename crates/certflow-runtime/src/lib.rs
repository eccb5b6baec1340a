//! Certflow Runtime
//!
//! This crate executes one workflow run. [`Invoker`] walks a validated
//! [`certflow_workflow::NodeGraph`], resolves a [`NodeProcessor`] for every
//! node through the [`ProcessorRegistry`] and routes failures into
//! `execute_failure` chains where the graph has them.
//!
//! Processors reach the outside world only through [`Services`]: the
//! repositories, the ACME [`certflow_acme::Issuer`] and the deployer,
//! notifier and inspector collaborators.

mod config;
mod error;
mod invoker;
mod log;
mod processor;
mod services;

pub use config::{ApplySettings, BranchPolicy, RuntimeConfig};
pub use error::{NodeError, RuntimeError};
pub use invoker::Invoker;
pub use log::NodeLog;
pub use processor::{
  ApplyProcessor, ConditionProcessor, DeployProcessor, Flow, MarkerProcessor, MonitorProcessor,
  NodeContext, NodeOutcome, NodeProcessor, NotifyProcessor, ProcessorRegistry, UploadProcessor,
};
pub use services::{
  DeployResult, Deployer, DeployerFactory, DeployerRequest, InspectedCertificate, Inspector,
  Notifier, Services,
};
