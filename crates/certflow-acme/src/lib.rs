//! Certflow ACME
//!
//! This crate coordinates certificate issuance for apply nodes:
//!
//! - [`resolve_ca`] picks the certificate authority and its External Account
//!   Binding credentials from node config and the `sslProvider` settings.
//! - [`AccountRegistry`] registers an ACME account at most once per
//!   `(ca, email)`, even under concurrent issuance: callers racing on one
//!   pair share a single [`KeyedFlight`] and its result.
//! - [`Issuer`] ties both together with an [`AcmeClient`] and a DNS-01
//!   [`ChallengeProvider`].
//!
//! [`InstantAcmeClient`] talks to real CA directories through `instant-acme`.

mod account;
mod ca;
mod certinfo;
mod challenge;
mod client;
mod error;
mod issuer;
mod keyed;

pub use account::{AccountRegistry, NewRegistration};
pub use ca::{CaConfig, CaProvider, EabCredentials, SslProviderSettings, eab_for, resolve_ca};
pub use certinfo::{CertificateInfo, parse_certificate, split_chain};
pub use challenge::{
  ChallengeProvider, ChallengeProviderFactory, ChallengeProviderRequest, dns01_record_name,
  dns01_record_value,
};
pub use client::{
  AcmeClient, AcmeClientFactory, InstantAcmeClient, InstantAcmeClientFactory, IssueRequest,
  IssuedCertificate,
};
pub use error::AcmeError;
pub use issuer::Issuer;
pub use keyed::KeyedFlight;
