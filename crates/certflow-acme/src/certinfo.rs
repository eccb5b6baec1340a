use chrono::{DateTime, Utc};
use x509_parser::prelude::*;

use crate::error::AcmeError;

const PEM_CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";

/// Fields of an X.509 certificate the engine records.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateInfo {
  pub subject_alt_names: Vec<String>,
  /// Hex serial number.
  pub serial_number: String,
  pub issuer_org: String,
  pub not_before: DateTime<Utc>,
  pub not_after: DateTime<Utc>,
}

/// Parse the first certificate of a PEM bundle.
pub fn parse_certificate(pem_text: &str) -> Result<CertificateInfo, AcmeError> {
  let (_, pem) = pem::parse_x509_pem(pem_text.as_bytes())
    .map_err(|e| AcmeError::CertificateParse(format!("invalid PEM: {e}")))?;
  let (_, cert) = X509Certificate::from_der(&pem.contents)
    .map_err(|e| AcmeError::CertificateParse(format!("invalid certificate: {e}")))?;

  let mut subject_alt_names = Vec::new();
  if let Ok(Some(san)) = cert.subject_alternative_name() {
    for name in &san.value.general_names {
      if let GeneralName::DNSName(dns) = name {
        subject_alt_names.push(dns.to_string());
      }
    }
  }
  if subject_alt_names.is_empty() {
    if let Some(cn) = cert
      .subject()
      .iter_common_name()
      .next()
      .and_then(|cn| cn.as_str().ok())
    {
      subject_alt_names.push(cn.to_string());
    }
  }

  let issuer_org = cert
    .issuer()
    .iter_organization()
    .next()
    .and_then(|o| o.as_str().ok())
    .unwrap_or_default()
    .to_string();

  let validity = cert.validity();
  Ok(CertificateInfo {
    subject_alt_names,
    serial_number: cert.raw_serial_as_string().replace(':', ""),
    issuer_org,
    not_before: timestamp(validity.not_before.timestamp())?,
    not_after: timestamp(validity.not_after.timestamp())?,
  })
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, AcmeError> {
  DateTime::from_timestamp(seconds, 0)
    .ok_or_else(|| AcmeError::CertificateParse(format!("invalid timestamp {seconds}")))
}

/// Split a full chain into the leaf certificate and the issuer chain.
pub fn split_chain(chain: &str) -> (String, String) {
  let chain = chain.trim_start();
  match chain[PEM_CERT_BEGIN.len().min(chain.len())..].find(PEM_CERT_BEGIN) {
    Some(offset) => {
      let at = offset + PEM_CERT_BEGIN.len();
      (
        chain[..at].trim_end().to_string() + "\n",
        chain[at..].to_string(),
      )
    }
    None => (chain.to_string(), String::new()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn self_signed(domains: &[&str]) -> String {
    let key = rcgen::KeyPair::generate().unwrap();
    let mut params =
      rcgen::CertificateParams::new(domains.iter().map(|d| d.to_string()).collect::<Vec<_>>())
        .unwrap();
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(2034, 1, 1);
    params.self_signed(&key).unwrap().pem()
  }

  #[test]
  fn test_parse_self_signed() {
    let info = parse_certificate(&self_signed(&["example.com", "www.example.com"])).unwrap();
    assert_eq!(info.subject_alt_names, vec!["example.com", "www.example.com"]);
    assert_eq!(info.not_after.format("%Y-%m-%d").to_string(), "2034-01-01");
    assert!(!info.serial_number.is_empty());
  }

  #[test]
  fn test_garbage_is_rejected() {
    assert!(matches!(
      parse_certificate("not a certificate"),
      Err(AcmeError::CertificateParse(_))
    ));
  }

  #[test]
  fn test_split_chain() {
    let leaf = self_signed(&["leaf.example.com"]);
    let issuer = self_signed(&["issuer.example.com"]);
    let (got_leaf, got_issuer) = split_chain(&format!("{leaf}{issuer}"));
    assert_eq!(got_leaf.trim(), leaf.trim());
    assert_eq!(got_issuer.trim(), issuer.trim());

    let (only, rest) = split_chain(&leaf);
    assert_eq!(only, leaf);
    assert!(rest.is_empty());
  }
}
