//! Certificate authority selection and EAB lookup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AcmeError;

/// A supported ACME certificate authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CaProvider {
  #[default]
  LetsEncrypt,
  LetsEncryptStaging,
  Buypass,
  GoogleTrustServices,
  SslCom,
  ZeroSsl,
}

impl CaProvider {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::LetsEncrypt => "letsencrypt",
      Self::LetsEncryptStaging => "letsencrypt_staging",
      Self::Buypass => "buypass",
      Self::GoogleTrustServices => "googletrustservices",
      Self::SslCom => "sslcom",
      Self::ZeroSsl => "zerossl",
    }
  }

  pub fn directory_url(&self) -> &'static str {
    match self {
      Self::LetsEncrypt => "https://acme-v02.api.letsencrypt.org/directory",
      Self::LetsEncryptStaging => "https://acme-staging-v02.api.letsencrypt.org/directory",
      Self::Buypass => "https://api.buypass.com/acme/directory",
      Self::GoogleTrustServices => "https://dv.acme-v02.api.pki.goog/directory",
      Self::SslCom => "https://acme.ssl.com/sslcom-dv-ecc",
      Self::ZeroSsl => "https://acme.zerossl.com/v2/DV90",
    }
  }

  /// Whether new accounts must be bound to an existing CA account.
  pub fn requires_eab(&self) -> bool {
    matches!(self, Self::GoogleTrustServices | Self::SslCom | Self::ZeroSsl)
  }
}

impl FromStr for CaProvider {
  type Err = AcmeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "letsencrypt" => Ok(Self::LetsEncrypt),
      "letsencrypt_staging" | "letsencryptstaging" => Ok(Self::LetsEncryptStaging),
      "buypass" => Ok(Self::Buypass),
      "googletrustservices" | "gts" => Ok(Self::GoogleTrustServices),
      "sslcom" => Ok(Self::SslCom),
      "zerossl" => Ok(Self::ZeroSsl),
      other => Err(AcmeError::UnknownCa(other.to_string())),
    }
  }
}

impl fmt::Display for CaProvider {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// External Account Binding credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EabCredentials {
  pub eab_kid: String,
  /// Base64url encoded HMAC key.
  pub eab_hmac_key: String,
}

impl EabCredentials {
  fn is_complete(&self) -> bool {
    !self.eab_kid.trim().is_empty() && !self.eab_hmac_key.trim().is_empty()
  }
}

/// The `sslProvider` settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SslProviderSettings {
  /// Default CA identifier.
  pub provider: String,
  /// Per-CA credentials keyed by CA identifier.
  pub config: HashMap<String, EabCredentials>,
}

/// Resolved CA for one issuance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaConfig {
  pub provider: CaProvider,
  pub eab: Option<EabCredentials>,
}

impl CaConfig {
  pub fn directory_url(&self) -> &'static str {
    self.provider.directory_url()
  }
}

/// EAB credentials to use for `ca`, given whatever credentials are on hand.
///
/// CAs that do not take EAB never get credentials; CAs that require it fail
/// when none are complete.
pub fn eab_for(
  ca: CaProvider,
  credentials: Option<&EabCredentials>,
) -> Result<Option<EabCredentials>, AcmeError> {
  if !ca.requires_eab() {
    return Ok(None);
  }
  match credentials {
    Some(eab) if eab.is_complete() => Ok(Some(eab.clone())),
    _ => Err(AcmeError::MissingEab {
      ca: ca.as_str().to_string(),
    }),
  }
}

/// Pick the CA for an apply node.
///
/// The node's own `caProvider` wins, then the `sslProvider` settings, then
/// Let's Encrypt. Credentials come from the node config when it names its own
/// CA and carries them, otherwise from the settings entry for that CA.
pub fn resolve_ca(
  node_ca: Option<&str>,
  node_ca_config: &Map<String, Value>,
  settings: Option<&SslProviderSettings>,
) -> Result<CaConfig, AcmeError> {
  let name = node_ca
    .filter(|n| !n.trim().is_empty())
    .or_else(|| {
      settings
        .map(|s| s.provider.as_str())
        .filter(|p| !p.trim().is_empty())
    })
    .unwrap_or(CaProvider::LetsEncrypt.as_str());
  let provider: CaProvider = name.parse()?;

  let from_node = match node_ca {
    Some(_) if !node_ca_config.is_empty() => Some(
      serde_json::from_value::<EabCredentials>(Value::Object(node_ca_config.clone()))
        .map_err(|e| AcmeError::InvalidConfig(format!("caProviderConfig: {e}")))?,
    ),
    _ => None,
  };
  let from_settings = settings.and_then(|s| s.config.get(provider.as_str()));

  let eab = eab_for(provider, from_node.as_ref().or(from_settings))?;
  Ok(CaConfig { provider, eab })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn eab() -> EabCredentials {
    EabCredentials {
      eab_kid: "kid".to_string(),
      eab_hmac_key: "aG1hYw".to_string(),
    }
  }

  #[test]
  fn test_eab_lookup() {
    assert_eq!(eab_for(CaProvider::LetsEncrypt, Some(&eab())).unwrap(), None);
    assert_eq!(eab_for(CaProvider::Buypass, None).unwrap(), None);
    assert_eq!(eab_for(CaProvider::ZeroSsl, Some(&eab())).unwrap(), Some(eab()));

    for ca in [
      CaProvider::ZeroSsl,
      CaProvider::GoogleTrustServices,
      CaProvider::SslCom,
    ] {
      assert!(matches!(
        eab_for(ca, None),
        Err(AcmeError::MissingEab { .. })
      ));
    }

    let incomplete = EabCredentials {
      eab_hmac_key: String::new(),
      ..eab()
    };
    assert!(eab_for(CaProvider::ZeroSsl, Some(&incomplete)).is_err());
  }

  #[test]
  fn test_resolve_defaults_to_letsencrypt() {
    let ca = resolve_ca(None, &Map::new(), None).unwrap();
    assert_eq!(ca.provider, CaProvider::LetsEncrypt);
    assert_eq!(ca.eab, None);
  }

  #[test]
  fn test_resolve_from_settings() {
    let settings: SslProviderSettings = serde_json::from_value(json!({
      "provider": "zerossl",
      "config": { "zerossl": { "eabKid": "kid", "eabHmacKey": "aG1hYw" } }
    }))
    .unwrap();

    let ca = resolve_ca(None, &Map::new(), Some(&settings)).unwrap();
    assert_eq!(ca.provider, CaProvider::ZeroSsl);
    assert_eq!(ca.eab, Some(eab()));
  }

  #[test]
  fn test_node_ca_overrides_settings() {
    let settings = SslProviderSettings {
      provider: "zerossl".to_string(),
      config: HashMap::new(),
    };
    let ca = resolve_ca(Some("buypass"), &Map::new(), Some(&settings)).unwrap();
    assert_eq!(ca.provider, CaProvider::Buypass);

    let node_config = json!({ "eabKid": "kid", "eabHmacKey": "aG1hYw" });
    let ca = resolve_ca(
      Some("googletrustservices"),
      node_config.as_object().unwrap(),
      None,
    )
    .unwrap();
    assert_eq!(ca.eab, Some(eab()));

    assert!(matches!(
      resolve_ca(Some("sslcom"), &Map::new(), Some(&settings)),
      Err(AcmeError::MissingEab { .. })
    ));
  }

  #[test]
  fn test_unknown_ca() {
    assert!(matches!(
      resolve_ca(Some("acme-corp"), &Map::new(), None),
      Err(AcmeError::UnknownCa(_))
    ));
  }
}
