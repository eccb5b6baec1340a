//! ACME protocol clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use certflow_store::{AcmeAccount, RegistrationResource};
use certflow_workflow::KeyAlgorithm;
use instant_acme::{
  Account, AccountCredentials, AuthorizationStatus, ChallengeType, ExternalAccountKey,
  Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use tracing::{debug, info, warn};

use crate::account::NewRegistration;
use crate::ca::{CaConfig, EabCredentials};
use crate::certinfo::split_chain;
use crate::challenge::{ChallengeProvider, dns01_record_name};
use crate::error::AcmeError;

const ORDER_READY_TIMEOUT: Duration = Duration::from_secs(180);
const CERTIFICATE_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// What to issue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueRequest {
  pub domains: Vec<String>,
  pub key_algorithm: KeyAlgorithm,
  /// Fixed wait after presenting records, before asking the CA to validate.
  pub propagation_wait: Option<Duration>,
}

/// A certificate obtained from a CA.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedCertificate {
  /// Leaf certificate PEM.
  pub certificate: String,
  pub private_key: String,
  /// Issuer chain PEM.
  pub issuer_certificate: String,
  pub account_url: String,
  pub certificate_url: Option<String>,
}

/// Talks to one CA directory.
#[async_trait]
pub trait AcmeClient: Send + Sync {
  /// Create a new account at the CA.
  async fn register(
    &self,
    email: &str,
    eab: Option<&EabCredentials>,
  ) -> Result<NewRegistration, AcmeError>;

  /// Order, validate through DNS-01 and download a certificate.
  async fn issue(
    &self,
    account: &AcmeAccount,
    request: &IssueRequest,
    challenge: &dyn ChallengeProvider,
  ) -> Result<IssuedCertificate, AcmeError>;
}

/// Builds the client for a resolved CA.
pub trait AcmeClientFactory: Send + Sync {
  fn client(&self, ca: &CaConfig) -> Result<Arc<dyn AcmeClient>, AcmeError>;
}

/// Factory for [`InstantAcmeClient`].
#[derive(Debug, Clone, Default)]
pub struct InstantAcmeClientFactory;

impl AcmeClientFactory for InstantAcmeClientFactory {
  fn client(&self, ca: &CaConfig) -> Result<Arc<dyn AcmeClient>, AcmeError> {
    Ok(Arc::new(InstantAcmeClient::new(ca.directory_url())))
  }
}

/// [`AcmeClient`] backed by `instant-acme`.
#[derive(Debug, Clone)]
pub struct InstantAcmeClient {
  directory_url: String,
}

/// A challenge record presented at the registrar.
struct Presented {
  domain: String,
  token: String,
  key_auth: String,
  url: String,
}

impl InstantAcmeClient {
  pub fn new(directory_url: impl Into<String>) -> Self {
    Self {
      directory_url: directory_url.into(),
    }
  }

  async fn account(&self, account: &AcmeAccount) -> Result<Account, AcmeError> {
    let credentials: AccountCredentials = serde_json::from_str(&account.private_key)
      .map_err(|e| AcmeError::Account(format!("stored credentials are unreadable: {e}")))?;
    Ok(
      Account::builder()
        .map_err(|e| AcmeError::Account(e.to_string()))?
        .from_credentials(credentials)
        .await
        .map_err(|e| AcmeError::Account(e.to_string()))?,
    )
  }

  /// Present a TXT record for every pending authorization.
  async fn present_all(
    order: &mut Order,
    challenge: &dyn ChallengeProvider,
    presented: &mut Vec<Presented>,
  ) -> Result<(), AcmeError> {
    let mut authorizations = order.authorizations();
    while let Some(result) = authorizations.next().await {
      let mut authz = result.map_err(|e| AcmeError::Order(e.to_string()))?;
      let domain = match &authz.identifier().identifier {
        Identifier::Dns(domain) => domain.clone(),
        _ => continue,
      };
      if authz.status == AuthorizationStatus::Valid {
        debug!(%domain, "authorization already valid");
        continue;
      }

      let dns01 = authz
        .challenge(ChallengeType::Dns01)
        .ok_or_else(|| AcmeError::Challenge {
          domain: domain.clone(),
          message: "CA offered no DNS-01 challenge".to_string(),
        })?;
      let key_auth = dns01.key_authorization().as_str().to_string();
      let token = dns01.token.clone();
      let url = dns01.url.clone();

      debug!(%domain, record = %dns01_record_name(&domain), "presenting DNS-01 challenge");
      challenge.present(&domain, &token, &key_auth).await?;
      presented.push(Presented {
        domain,
        token,
        key_auth,
        url,
      });
    }
    Ok(())
  }

  /// Tell the CA every presented challenge is ready.
  async fn set_ready(order: &mut Order, presented: &[Presented]) -> Result<(), AcmeError> {
    let mut authorizations = order.authorizations();
    while let Some(result) = authorizations.next().await {
      let mut authz = result.map_err(|e| AcmeError::Order(e.to_string()))?;
      let Some(entry) = presented
        .iter()
        .find(|p| authz.challenges.iter().any(|c| c.url == p.url))
      else {
        continue;
      };
      if let Some(mut challenge) = authz.challenge(ChallengeType::Dns01) {
        challenge
          .set_ready()
          .await
          .map_err(|e| AcmeError::Challenge {
            domain: entry.domain.clone(),
            message: e.to_string(),
          })?;
      }
    }
    Ok(())
  }

  async fn wait_ready(order: &mut Order) -> Result<(), AcmeError> {
    let deadline = tokio::time::Instant::now() + ORDER_READY_TIMEOUT;
    loop {
      let state = order.refresh().await?;
      match state.status {
        OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
        OrderStatus::Invalid => {
          return Err(AcmeError::Order("order became invalid".to_string()));
        }
        OrderStatus::Pending | OrderStatus::Processing => {
          if tokio::time::Instant::now() > deadline {
            return Err(AcmeError::Timeout("order did not become ready".to_string()));
          }
          tokio::time::sleep(POLL_INTERVAL).await;
        }
      }
    }
  }

  async fn finalize(
    order: &mut Order,
    request: &IssueRequest,
  ) -> Result<(String, String), AcmeError> {
    let algorithm = match request.key_algorithm {
      KeyAlgorithm::Ec256 => &rcgen::PKCS_ECDSA_P256_SHA256,
      KeyAlgorithm::Ec384 => &rcgen::PKCS_ECDSA_P384_SHA384,
      other => return Err(AcmeError::UnsupportedKeyAlgorithm(other.to_string())),
    };
    let key = rcgen::KeyPair::generate_for(algorithm)
      .map_err(|e| AcmeError::Finalization(format!("key generation: {e}")))?;
    let csr = rcgen::CertificateParams::new(request.domains.clone())
      .map_err(|e| AcmeError::Finalization(format!("CSR params: {e}")))?
      .serialize_request(&key)
      .map_err(|e| AcmeError::Finalization(format!("CSR: {e}")))?;

    order.finalize_csr(&csr.der().to_vec()).await?;

    let deadline = tokio::time::Instant::now() + CERTIFICATE_TIMEOUT;
    let chain = loop {
      let state = order.refresh().await?;
      match state.status {
        OrderStatus::Valid => {
          break order
            .certificate()
            .await?
            .ok_or_else(|| AcmeError::Finalization("no certificate in response".to_string()))?;
        }
        OrderStatus::Invalid => {
          return Err(AcmeError::Finalization("order became invalid".to_string()));
        }
        _ => {
          if tokio::time::Instant::now() > deadline {
            return Err(AcmeError::Timeout("certificate was not issued".to_string()));
          }
          tokio::time::sleep(POLL_INTERVAL).await;
        }
      }
    };

    Ok((chain, key.serialize_pem()))
  }
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
  async fn register(
    &self,
    email: &str,
    eab: Option<&EabCredentials>,
  ) -> Result<NewRegistration, AcmeError> {
    let external = eab
      .map(|eab| {
        let hmac = URL_SAFE_NO_PAD
          .decode(eab.eab_hmac_key.trim_end_matches('='))
          .map_err(|e| AcmeError::InvalidConfig(format!("EAB HMAC key is not base64url: {e}")))?;
        Ok::<_, AcmeError>(ExternalAccountKey::new(eab.eab_kid.clone(), &hmac))
      })
      .transpose()?;

    let contact = format!("mailto:{email}");
    let (account, credentials) = Account::builder()
      .map_err(|e| AcmeError::Account(e.to_string()))?
      .create(
        &NewAccount {
          contact: &[&contact],
          terms_of_service_agreed: true,
          only_return_existing: false,
        },
        self.directory_url.clone(),
        external.as_ref(),
      )
      .await
      .map_err(|e| AcmeError::Account(e.to_string()))?;

    let credentials = serde_json::to_string(&credentials)
      .map_err(|e| AcmeError::Account(format!("credentials are not serializable: {e}")))?;
    Ok(NewRegistration {
      credentials,
      resource: RegistrationResource {
        uri: account.id().to_string(),
        body: serde_json::json!({ "contact": [contact] }),
      },
    })
  }

  async fn issue(
    &self,
    account: &AcmeAccount,
    request: &IssueRequest,
    challenge: &dyn ChallengeProvider,
  ) -> Result<IssuedCertificate, AcmeError> {
    let acme = self.account(account).await?;
    let identifiers: Vec<Identifier> = request
      .domains
      .iter()
      .map(|d| Identifier::Dns(d.clone()))
      .collect();

    info!(domains = ?request.domains, "creating certificate order");
    let mut order = acme
      .new_order(&NewOrder::new(&identifiers))
      .await
      .map_err(|e| AcmeError::Order(e.to_string()))?;

    let mut presented = Vec::new();
    let result = async {
      Self::present_all(&mut order, challenge, &mut presented).await?;
      if let Some(wait) = request.propagation_wait {
        tokio::time::sleep(wait).await;
      }
      Self::set_ready(&mut order, &presented).await?;
      Self::wait_ready(&mut order).await?;
      Self::finalize(&mut order, request).await
    }
    .await;

    for entry in &presented {
      if let Err(e) = challenge
        .cleanup(&entry.domain, &entry.token, &entry.key_auth)
        .await
      {
        warn!(domain = %entry.domain, error = %e, "failed to clean up challenge record");
      }
    }

    let (chain, private_key) = result?;
    let (certificate, issuer_certificate) = split_chain(&chain);
    info!(domains = ?request.domains, "certificate issued");

    Ok(IssuedCertificate {
      certificate,
      private_key,
      issuer_certificate,
      account_url: account.resource.uri.clone(),
      certificate_url: order.state().certificate.clone(),
    })
  }
}
