use certflow_workflow::{NodeDef, WorkflowTrigger};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::Error;

/// Status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Canceled,
}

impl WorkflowRunStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
      Self::Canceled => "canceled",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
  }
}

/// A workflow definition as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Workflow {
  pub id: String,
  pub name: String,
  pub enabled: bool,
  #[sqlx(try_from = "String")]
  pub trigger: WorkflowTrigger,
  pub trigger_cron: Option<String>,
  /// Committed graph; the only one the engine runs.
  pub content: Option<Json<NodeDef>>,
  pub draft: Option<Json<NodeDef>>,
  pub has_draft: bool,
  pub last_run_id: Option<String>,
  pub last_run_status: Option<WorkflowRunStatus>,
  pub last_run_time: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Workflow {
  /// An enabled, manually triggered workflow with `content` committed.
  pub fn new(id: impl Into<String>, name: impl Into<String>, content: NodeDef) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      name: name.into(),
      enabled: true,
      trigger: WorkflowTrigger::Manual,
      trigger_cron: None,
      content: Some(Json(content)),
      draft: None,
      has_draft: false,
      last_run_id: None,
      last_run_status: None,
      last_run_time: None,
      created_at: now,
      updated_at: now,
    }
  }
}

/// Severity of a run log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
  Debug,
  Info,
  Warn,
  Error,
}

/// A single message recorded while a node was processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogRecord {
  pub time: DateTime<Utc>,
  pub level: LogLevel,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

/// Log entry of one processed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
  pub node_id: String,
  pub node_name: String,
  #[serde(default)]
  pub records: Vec<RunLogRecord>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

/// A workflow run as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowRun {
  pub id: String,
  pub workflow_id: String,
  pub status: WorkflowRunStatus,
  #[sqlx(try_from = "String")]
  pub trigger: WorkflowTrigger,
  pub started_at: Option<DateTime<Utc>>,
  pub ended_at: Option<DateTime<Utc>>,
  pub logs: Json<Vec<RunLog>>,
  pub error: Option<String>,
  /// Snapshot of the graph this run executes.
  pub detail: Option<Json<NodeDef>>,
  pub created_at: DateTime<Utc>,
}

impl WorkflowRun {
  pub fn pending(
    id: impl Into<String>,
    workflow_id: impl Into<String>,
    trigger: WorkflowTrigger,
    detail: NodeDef,
  ) -> Self {
    Self {
      id: id.into(),
      workflow_id: workflow_id.into(),
      status: WorkflowRunStatus::Pending,
      trigger,
      started_at: None,
      ended_at: None,
      logs: Json(Vec::new()),
      error: None,
      detail: Some(Json(detail)),
      created_at: Utc::now(),
    }
  }
}

/// Criteria for bulk run deletion. Unset fields match every run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
  pub workflow_id: Option<String>,
  pub statuses: Vec<WorkflowRunStatus>,
  pub created_before: Option<DateTime<Utc>>,
}

impl RunFilter {
  pub fn matches(&self, run: &WorkflowRun) -> bool {
    self
      .workflow_id
      .as_ref()
      .is_none_or(|id| *id == run.workflow_id)
      && (self.statuses.is_empty() || self.statuses.contains(&run.status))
      && self.created_before.is_none_or(|cutoff| run.created_at < cutoff)
  }
}

/// A named output value of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
  pub name: String,
  pub value: Value,
}

/// The persisted result of the last run of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowOutput {
  pub id: String,
  pub workflow_id: String,
  pub run_id: String,
  pub node_id: String,
  /// Config the node ran with.
  pub node_config: Json<Map<String, Value>>,
  pub outputs: Json<Vec<OutputValue>>,
  pub succeeded: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl WorkflowOutput {
  pub fn output(&self, name: &str) -> Option<&Value> {
    self
      .outputs
      .iter()
      .find(|o| o.name == name)
      .map(|o| &o.value)
  }

  /// Decode the recorded node config into its typed form.
  pub fn config<T: DeserializeOwned>(&self) -> Result<T, Error> {
    Ok(serde_json::from_value(Value::Object(self.node_config.0.clone()))?)
  }
}

/// Where a certificate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CertificateSource {
  Workflow,
  Upload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Certificate {
  pub id: String,
  pub source: CertificateSource,
  pub subject_alt_names: Json<Vec<String>>,
  pub serial_number: String,
  pub issuer_org: String,
  pub key_algorithm: String,
  pub certificate: String,
  pub private_key: String,
  pub issuer_certificate: String,
  pub acme_account_url: Option<String>,
  pub acme_certificate_url: Option<String>,
  pub effective_at: DateTime<Utc>,
  pub expire_at: DateTime<Utc>,
  pub workflow_id: Option<String>,
  pub workflow_run_id: Option<String>,
  pub workflow_node_id: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Registration resource returned by the CA for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResource {
  /// Account URL.
  pub uri: String,
  #[serde(default)]
  pub body: Value,
}

/// An ACME account, unique per `(ca, email)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AcmeAccount {
  pub id: String,
  pub ca: String,
  pub email: String,
  /// Serialized account credentials (key material).
  pub private_key: String,
  pub resource: Json<RegistrationResource>,
  pub created_at: DateTime<Utc>,
}

/// A named settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Settings {
  pub name: String,
  pub content: Json<Value>,
  pub updated_at: DateTime<Utc>,
}

impl Settings {
  /// Default CA and its EAB credentials.
  pub const SSL_PROVIDER: &'static str = "sslProvider";
  /// Notification channel configs keyed by channel.
  pub const NOTIFY_CHANNELS: &'static str = "notifyChannels";
  /// Run retention.
  pub const PERSISTENCE: &'static str = "persistence";

  pub fn new(name: impl Into<String>, content: Value) -> Self {
    Self {
      name: name.into(),
      content: Json(content),
      updated_at: Utc::now(),
    }
  }

  pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
    Ok(serde_json::from_value(self.content.0.clone())?)
  }
}
