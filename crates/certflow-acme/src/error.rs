use std::sync::Arc;

use thiserror::Error;

/// Errors raised while selecting a CA, registering an account or issuing.
#[derive(Debug, Error)]
pub enum AcmeError {
  #[error("unknown certificate authority: {0}")]
  UnknownCa(String),

  #[error("certificate authority '{ca}' requires EAB credentials")]
  MissingEab { ca: String },

  #[error("invalid ACME configuration: {0}")]
  InvalidConfig(String),

  #[error("unsupported key algorithm: {0}")]
  UnsupportedKeyAlgorithm(String),

  #[error("failed to register ACME account: {0}")]
  Account(String),

  #[error("failed to create certificate order: {0}")]
  Order(String),

  #[error("challenge for '{domain}' failed: {message}")]
  Challenge { domain: String, message: String },

  #[error("failed to finalize order: {0}")]
  Finalization(String),

  #[error("timed out: {0}")]
  Timeout(String),

  #[error("failed to parse certificate: {0}")]
  CertificateParse(String),

  #[error("ACME protocol error: {0}")]
  Protocol(String),

  #[error(transparent)]
  Store(#[from] certflow_store::Error),

  /// An error of a registration other callers waited on.
  #[error(transparent)]
  Shared(Arc<AcmeError>),
}

impl AcmeError {
  pub fn is_cancellation(&self) -> bool {
    match self {
      Self::Store(e) => e.is_cancellation(),
      Self::Shared(e) => e.is_cancellation(),
      _ => false,
    }
  }
}

impl From<instant_acme::Error> for AcmeError {
  fn from(e: instant_acme::Error) -> Self {
    AcmeError::Protocol(e.to_string())
  }
}
