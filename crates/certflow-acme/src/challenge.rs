//! DNS-01 challenge providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::AcmeError;

const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Presents and removes DNS-01 TXT records at one DNS registrar.
#[async_trait]
pub trait ChallengeProvider: Send + Sync {
  /// Publish the TXT record answering the challenge for `domain`.
  async fn present(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), AcmeError>;

  /// Remove the record published by [`ChallengeProvider::present`].
  async fn cleanup(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), AcmeError>;
}

/// What an apply node asks of its DNS registrar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChallengeProviderRequest {
  /// Registrar identifier, e.g. `cloudflare`.
  pub provider: String,
  pub access_id: Option<String>,
  pub config: Map<String, Value>,
  pub nameservers: Vec<String>,
  pub ttl: Option<u32>,
  pub propagation_timeout: Option<Duration>,
  pub disable_follow_cname: bool,
}

/// Builds challenge providers from node configuration.
pub trait ChallengeProviderFactory: Send + Sync {
  fn provider(
    &self,
    request: &ChallengeProviderRequest,
  ) -> Result<Arc<dyn ChallengeProvider>, AcmeError>;
}

/// Name of the TXT record for `domain`. Wildcards share their base name.
pub fn dns01_record_name(domain: &str) -> String {
  let domain = domain.trim_start_matches("*.").trim_end_matches('.');
  format!("{ACME_CHALLENGE_LABEL}.{domain}")
}

/// TXT record value: base64url SHA-256 of the key authorization.
pub fn dns01_record_value(key_auth: &str) -> String {
  URL_SAFE_NO_PAD.encode(Sha256::digest(key_auth.as_bytes()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record_name() {
    assert_eq!(dns01_record_name("example.com"), "_acme-challenge.example.com");
    assert_eq!(dns01_record_name("*.example.com."), "_acme-challenge.example.com");
  }

  #[test]
  fn test_record_value() {
    let value = dns01_record_value("token.thumbprint");
    assert_eq!(value.len(), 43);
    assert!(!value.contains('='));
    assert_eq!(value, dns01_record_value("token.thumbprint"));
    assert_ne!(value, dns01_record_value("token.other"));
  }
}
