use std::sync::Arc;

use certflow_store::AcmeAccountRepository;
use tracing::instrument;

use crate::account::AccountRegistry;
use crate::ca::CaConfig;
use crate::challenge::ChallengeProvider;
use crate::client::{AcmeClientFactory, IssueRequest, IssuedCertificate};
use crate::error::AcmeError;

/// Issues certificates, registering the ACME account on first use.
pub struct Issuer {
  registry: AccountRegistry,
  clients: Arc<dyn AcmeClientFactory>,
}

impl Issuer {
  pub fn new(accounts: Arc<dyn AcmeAccountRepository>, clients: Arc<dyn AcmeClientFactory>) -> Self {
    Self {
      registry: AccountRegistry::new(accounts),
      clients,
    }
  }

  #[instrument(skip_all, fields(ca = %ca.provider, domains = ?request.domains))]
  pub async fn issue(
    &self,
    ca: &CaConfig,
    email: &str,
    request: &IssueRequest,
    challenge: &dyn ChallengeProvider,
  ) -> Result<IssuedCertificate, AcmeError> {
    if request.domains.is_empty() {
      return Err(AcmeError::InvalidConfig("no domains to issue for".to_string()));
    }

    let client = self.clients.client(ca)?;
    let account = self
      .registry
      .register(ca.provider.as_str(), email, || {
        client.register(email, ca.eab.as_ref())
      })
      .await?;

    client.issue(&account, request, challenge).await
  }
}
