use std::future::Future;
use std::sync::Arc;

use certflow_store::{AcmeAccount, AcmeAccountRepository, Json, RegistrationResource};
use chrono::Utc;
use tracing::{debug, info};

use crate::error::AcmeError;
use crate::keyed::KeyedFlight;

/// Result of a fresh registration round trip with a CA.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
  /// Serialized account credentials.
  pub credentials: String,
  pub resource: RegistrationResource,
}

/// Outcome of one registration, shared with every caller that waited on it.
type Registration = Result<AcmeAccount, Arc<AcmeError>>;

/// Registers ACME accounts at most once per `(ca, email)`.
pub struct AccountRegistry {
  accounts: Arc<dyn AcmeAccountRepository>,
  flights: KeyedFlight<(String, String), Registration>,
}

impl AccountRegistry {
  pub fn new(accounts: Arc<dyn AcmeAccountRepository>) -> Self {
    Self {
      accounts,
      flights: KeyedFlight::new(),
    }
  }

  /// Return the stored account for `(ca, email)`, registering it through
  /// `register` when none exists.
  ///
  /// Concurrent callers for the same pair share one registration and its
  /// result, failure included. The store is checked before joining the
  /// registration and again by the caller that performs it.
  pub async fn register<F, Fut>(
    &self,
    ca: &str,
    email: &str,
    register: F,
  ) -> Result<AcmeAccount, AcmeError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<NewRegistration, AcmeError>>,
  {
    if let Some(account) = self.accounts.get_account(ca, email).await? {
      return Ok(account);
    }

    self
      .flights
      .run((ca.to_string(), email.to_string()), || async move {
        self.create(ca, email, register).await.map_err(Arc::new)
      })
      .await
      .map_err(AcmeError::Shared)
  }

  async fn create<F, Fut>(
    &self,
    ca: &str,
    email: &str,
    register: F,
  ) -> Result<AcmeAccount, AcmeError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<NewRegistration, AcmeError>>,
  {
    if let Some(account) = self.accounts.get_account(ca, email).await? {
      debug!(ca, email, "account registered by a concurrent caller");
      return Ok(account);
    }

    info!(ca, email, "registering ACME account");
    let registration = register().await?;
    let account = AcmeAccount {
      id: uuid::Uuid::new_v4().to_string(),
      ca: ca.to_string(),
      email: email.to_string(),
      private_key: registration.credentials,
      resource: Json(registration.resource),
      created_at: Utc::now(),
    };
    self.accounts.save_account(&account).await?;

    Ok(account)
  }
}
