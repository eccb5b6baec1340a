//! Certflow Store
//!
//! This crate provides the repository traits the engine persists through and
//! two implementations of them:
//!
//! - [`MemoryStore`] keeps every table in process memory.
//! - [`SqliteStore`] persists to SQLite through `sqlx`, with JSON columns for
//!   node graphs, run logs, outputs and ACME registration resources.
//!
//! Every `save` is an upsert keyed by the record's identity, so saving a
//! record twice leaves a single row.

mod memory;
mod sqlite;
mod types;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlx::types::Json;
pub use sqlite::SqliteStore;
pub use types::{
  AcmeAccount, Certificate, CertificateSource, LogLevel, OutputValue, RegistrationResource,
  RunFilter, RunLog, RunLogRecord, Settings, Workflow, WorkflowOutput, WorkflowRun,
  WorkflowRunStatus,
};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// The store has been closed and accepts no more operations.
  #[error("store is closed")]
  Closed,

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// A migration failed to apply.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// A JSON document could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the error means the store went away, as during shutdown,
  /// rather than that the operation itself failed.
  pub fn is_cancellation(&self) -> bool {
    matches!(
      self,
      Self::Closed | Self::Database(sqlx::Error::PoolClosed)
    )
  }
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
  async fn get_workflow(&self, id: &str) -> Result<Workflow, Error>;

  async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Error>;

  /// Point the run's workflow at it, touching only the last-run fields.
  ///
  /// Left unchanged when a different run created later already owns them,
  /// or when the workflow no longer exists.
  async fn record_last_run(&self, run: &WorkflowRun) -> Result<(), Error>;
}

#[async_trait]
pub trait WorkflowRunRepository: Send + Sync {
  async fn get_run(&self, id: &str) -> Result<WorkflowRun, Error>;

  async fn save_run(&self, run: &WorkflowRun) -> Result<(), Error>;

  /// Runs of a workflow, newest first.
  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRun>, Error>;

  /// Runs in the given status, oldest first.
  async fn list_runs_by_status(&self, status: WorkflowRunStatus)
  -> Result<Vec<WorkflowRun>, Error>;

  /// Delete every run matching `filter`, returning how many were removed.
  async fn delete_runs_where(&self, filter: &RunFilter) -> Result<u64, Error>;
}

#[async_trait]
pub trait WorkflowOutputRepository: Send + Sync {
  /// The last output recorded for a node, if the node ever ran.
  async fn get_output_by_node(&self, node_id: &str) -> Result<Option<WorkflowOutput>, Error>;

  /// Upsert keyed by node id.
  async fn save_output(&self, output: &WorkflowOutput) -> Result<(), Error>;
}

#[async_trait]
pub trait CertificateRepository: Send + Sync {
  async fn get_certificate(&self, id: &str) -> Result<Certificate, Error>;

  /// The newest certificate produced by a workflow node.
  async fn get_certificate_by_node(&self, node_id: &str) -> Result<Option<Certificate>, Error>;

  async fn save_certificate(&self, certificate: &Certificate) -> Result<(), Error>;
}

#[async_trait]
pub trait AcmeAccountRepository: Send + Sync {
  async fn get_account(&self, ca: &str, email: &str) -> Result<Option<AcmeAccount>, Error>;

  /// Upsert keyed by `(ca, email)`.
  async fn save_account(&self, account: &AcmeAccount) -> Result<(), Error>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
  async fn get_settings(&self, name: &str) -> Result<Option<Settings>, Error>;

  async fn save_settings(&self, settings: &Settings) -> Result<(), Error>;
}

/// A backend implementing every repository.
pub trait Store:
  WorkflowRepository
  + WorkflowRunRepository
  + WorkflowOutputRepository
  + CertificateRepository
  + AcmeAccountRepository
  + SettingsRepository
{
}

impl<T> Store for T where
  T: WorkflowRepository
    + WorkflowRunRepository
    + WorkflowOutputRepository
    + CertificateRepository
    + AcmeAccountRepository
    + SettingsRepository
{
}

/// Shared handles to every repository, cloned into the engine's parts.
#[derive(Clone)]
pub struct Repositories {
  pub workflows: Arc<dyn WorkflowRepository>,
  pub runs: Arc<dyn WorkflowRunRepository>,
  pub outputs: Arc<dyn WorkflowOutputRepository>,
  pub certificates: Arc<dyn CertificateRepository>,
  pub accounts: Arc<dyn AcmeAccountRepository>,
  pub settings: Arc<dyn SettingsRepository>,
}

impl Repositories {
  /// Serve every repository from one backend.
  pub fn from_store<S: Store + 'static>(store: Arc<S>) -> Self {
    Self {
      workflows: store.clone(),
      runs: store.clone(),
      outputs: store.clone(),
      certificates: store.clone(),
      accounts: store.clone(),
      settings: store,
    }
  }
}
