//! Typed views over the free-form node config map.

use std::collections::BTreeSet;
use std::fmt;

use certflow_expr::Expr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;

/// Private key algorithm requested for an issued certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
  #[serde(rename = "RSA2048")]
  Rsa2048,
  #[serde(rename = "RSA3072")]
  Rsa3072,
  #[serde(rename = "RSA4096")]
  Rsa4096,
  #[serde(rename = "RSA8192")]
  Rsa8192,
  #[default]
  #[serde(rename = "EC256")]
  Ec256,
  #[serde(rename = "EC384")]
  Ec384,
}

impl KeyAlgorithm {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Rsa2048 => "RSA2048",
      Self::Rsa3072 => "RSA3072",
      Self::Rsa4096 => "RSA4096",
      Self::Rsa8192 => "RSA8192",
      Self::Ec256 => "EC256",
      Self::Ec384 => "EC384",
    }
  }
}

impl fmt::Display for KeyAlgorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Config of an `apply` node: issue a certificate through ACME DNS-01.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplyNodeConfig {
  pub domains: Vec<String>,
  pub contact_email: String,
  /// DNS registrar used to answer the DNS-01 challenge.
  pub provider: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provider_access_id: Option<String>,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub provider_config: Map<String, Value>,
  /// Certificate authority; falls back to the `sslProvider` setting.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ca_provider: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ca_provider_access_id: Option<String>,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub ca_provider_config: Map<String, Value>,
  pub key_algorithm: KeyAlgorithm,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub nameservers: Vec<String>,
  /// Seconds to wait after presenting the TXT records.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dns_propagation_wait: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dns_propagation_timeout: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dns_ttl: Option<u32>,
  pub disable_follow_cname: bool,
  /// Renew once the certificate has fewer days left than this.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub skip_before_expiry_days: Option<u32>,
}

impl ApplyNodeConfig {
  pub fn validate(&self, node_id: &str) -> Result<(), WorkflowError> {
    if self.domains.iter().all(|d| d.trim().is_empty()) {
      return Err(WorkflowError::invalid_config(node_id, "no domains configured"));
    }
    if !self.contact_email.contains('@') {
      return Err(WorkflowError::invalid_config(
        node_id,
        format!("invalid contact email '{}'", self.contact_email),
      ));
    }
    if self.provider.trim().is_empty() {
      return Err(WorkflowError::invalid_config(node_id, "no DNS provider configured"));
    }
    Ok(())
  }

  /// Normalized domain set: trimmed, lowercased, deduplicated, order-free.
  pub fn domain_set(&self) -> BTreeSet<String> {
    self
      .domains
      .iter()
      .map(|d| d.trim().to_ascii_lowercase())
      .filter(|d| !d.is_empty())
      .collect()
  }

  /// Whether a certificate issued under `previous` still satisfies this
  /// config: same domains, key algorithm and CA settings.
  pub fn same_issuance_as(&self, previous: &ApplyNodeConfig) -> bool {
    self.domain_set() == previous.domain_set()
      && self.key_algorithm == previous.key_algorithm
      && self.ca_provider == previous.ca_provider
      && self.ca_provider_access_id == previous.ca_provider_access_id
      && self.ca_provider_config == previous.ca_provider_config
  }
}

/// Config of an `upload` node: a user supplied certificate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadNodeConfig {
  pub certificate: String,
  pub private_key: String,
}

impl UploadNodeConfig {
  pub fn validate(&self, node_id: &str) -> Result<(), WorkflowError> {
    if self.certificate.trim().is_empty() || self.private_key.trim().is_empty() {
      return Err(WorkflowError::invalid_config(
        node_id,
        "certificate and private key are required",
      ));
    }
    Ok(())
  }
}

/// Config of a `deploy` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployNodeConfig {
  /// Output selector of the certificate to deploy: `<nodeId>#certificate`.
  pub certificate: String,
  pub provider: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub provider_access_id: Option<String>,
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub provider_config: Map<String, Value>,
  pub skip_on_last_succeeded: bool,
}

impl DeployNodeConfig {
  pub fn validate(&self, node_id: &str) -> Result<(), WorkflowError> {
    self.certificate_source(node_id)?;
    if self.provider.trim().is_empty() {
      return Err(WorkflowError::invalid_config(node_id, "no deploy provider configured"));
    }
    Ok(())
  }

  /// Id of the node whose certificate is deployed.
  pub fn certificate_source(&self, node_id: &str) -> Result<&str, WorkflowError> {
    match self.certificate.split_once('#') {
      Some((source, "certificate")) if !source.is_empty() => Ok(source),
      _ => Err(WorkflowError::invalid_config(
        node_id,
        format!("invalid certificate selector '{}'", self.certificate),
      )),
    }
  }
}

/// Config of a `notify` node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifyNodeConfig {
  pub channel: String,
  pub subject: String,
  pub message: String,
  /// Channel settings; falls back to the `notifyChannels` setting.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub channel_config: Option<Map<String, Value>>,
}

impl NotifyNodeConfig {
  pub fn validate(&self, node_id: &str) -> Result<(), WorkflowError> {
    if self.channel.trim().is_empty() {
      return Err(WorkflowError::invalid_config(node_id, "no notify channel configured"));
    }
    if self.subject.trim().is_empty() && self.message.trim().is_empty() {
      return Err(WorkflowError::invalid_config(node_id, "subject and message are empty"));
    }
    Ok(())
  }
}

/// Config of a `condition` node. A missing expression always passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionNodeConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub expression: Option<Expr>,
}

/// Config of a `monitor`/`inspect` node: check a live endpoint's certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorNodeConfig {
  pub host: String,
  pub port: u16,
  /// SNI name; defaults to `host`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub domain: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub request_path: Option<String>,
}

impl Default for MonitorNodeConfig {
  fn default() -> Self {
    Self {
      host: String::new(),
      port: 443,
      domain: None,
      request_path: None,
    }
  }
}

impl MonitorNodeConfig {
  pub fn validate(&self, node_id: &str) -> Result<(), WorkflowError> {
    if self.host.trim().is_empty() {
      return Err(WorkflowError::invalid_config(node_id, "no host configured"));
    }
    if self.port == 0 {
      return Err(WorkflowError::invalid_config(node_id, "port must be non-zero"));
    }
    Ok(())
  }

  pub fn server_name(&self) -> &str {
    self.domain.as_deref().unwrap_or(&self.host)
  }
}
