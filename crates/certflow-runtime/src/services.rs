//! Collaborators node processors reach outside the engine through.

use std::sync::Arc;

use async_trait::async_trait;
use certflow_acme::{AcmeClientFactory, ChallengeProviderFactory, Issuer};
use certflow_store::Repositories;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;

/// Outcome reported by a deployer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployResult {
  /// Provider specific details, recorded in the run log.
  pub details: Map<String, Value>,
}

/// Installs a certificate on one hosting, CDN or cloud target.
#[async_trait]
pub trait Deployer: Send + Sync {
  async fn deploy(
    &self,
    cancel: &CancellationToken,
    cert_pem: &str,
    key_pem: &str,
  ) -> Result<DeployResult, NodeError>;
}

/// What a deploy node asks for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployerRequest {
  pub provider: String,
  pub access_id: Option<String>,
  pub config: Map<String, Value>,
}

pub trait DeployerFactory: Send + Sync {
  fn deployer(&self, request: &DeployerRequest) -> Result<Arc<dyn Deployer>, NodeError>;
}

/// Sends notifications over a channel such as email or a webhook.
#[async_trait]
pub trait Notifier: Send + Sync {
  async fn send(
    &self,
    channel: &str,
    subject: &str,
    message: &str,
    channel_config: &Map<String, Value>,
  ) -> Result<(), NodeError>;
}

/// Certificate presented by a live endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectedCertificate {
  pub subject_alt_names: Vec<String>,
  pub issuer_org: String,
  pub not_before: DateTime<Utc>,
  pub not_after: DateTime<Utc>,
  /// Whether the chain verified and matched the requested name.
  pub validated: bool,
}

/// Fetches the certificate a TLS endpoint serves.
#[async_trait]
pub trait Inspector: Send + Sync {
  async fn inspect(
    &self,
    host: &str,
    port: u16,
    domain: &str,
  ) -> Result<InspectedCertificate, NodeError>;
}

/// Everything node processors need besides the node itself.
pub struct Services {
  pub repositories: Repositories,
  pub issuer: Issuer,
  pub challenges: Arc<dyn ChallengeProviderFactory>,
  pub deployers: Arc<dyn DeployerFactory>,
  pub notifier: Arc<dyn Notifier>,
  pub inspector: Arc<dyn Inspector>,
}

impl Services {
  pub fn new(
    repositories: Repositories,
    acme_clients: Arc<dyn AcmeClientFactory>,
    challenges: Arc<dyn ChallengeProviderFactory>,
    deployers: Arc<dyn DeployerFactory>,
    notifier: Arc<dyn Notifier>,
    inspector: Arc<dyn Inspector>,
  ) -> Self {
    let issuer = Issuer::new(repositories.accounts.clone(), acme_clients);
    Self {
      repositories,
      issuer,
      challenges,
      deployers,
      notifier,
      inspector,
    }
  }
}
