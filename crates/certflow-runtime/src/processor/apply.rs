use std::time::Duration;

use async_trait::async_trait;
use certflow_acme::{
  ChallengeProviderRequest, IssueRequest, SslProviderSettings, parse_certificate, resolve_ca,
};
use certflow_store::{Certificate, CertificateSource, Json, Settings};
use certflow_workflow::ApplyNodeConfig;
use chrono::{TimeDelta, Utc};
use serde_json::json;

use super::{NodeContext, NodeOutcome, NodeProcessor, save_output};
use crate::error::NodeError;
use crate::log::NodeLog;

/// Obtain a certificate through ACME, unless the last one is still good.
pub struct ApplyProcessor;

#[async_trait]
impl NodeProcessor for ApplyProcessor {
  async fn process(
    &self,
    ctx: &NodeContext<'_>,
    log: &mut NodeLog,
  ) -> Result<NodeOutcome, NodeError> {
    let config: ApplyNodeConfig = ctx.node.config()?;
    config.validate(&ctx.node.id)?;

    if let Some(certificate) = reusable_certificate(ctx, &config, log).await? {
      log.info_with(
        "certificate is still valid, skipping issuance",
        json!({
          "certificateId": certificate.id,
          "expireAt": certificate.expire_at,
        }),
      );
      return Ok(outcome(&certificate));
    }

    let services = ctx.services;
    let challenge = services.challenges.provider(&ChallengeProviderRequest {
      provider: config.provider.clone(),
      access_id: config.provider_access_id.clone(),
      config: config.provider_config.clone(),
      nameservers: config.nameservers.clone(),
      ttl: config.dns_ttl,
      propagation_timeout: config.dns_propagation_timeout.map(Duration::from_secs),
      disable_follow_cname: config.disable_follow_cname,
    })?;

    let ssl_settings = services
      .repositories
      .settings
      .get_settings(Settings::SSL_PROVIDER)
      .await?
      .map(|s| s.content_as::<SslProviderSettings>())
      .transpose()?;
    let ca = resolve_ca(
      config.ca_provider.as_deref(),
      &config.ca_provider_config,
      ssl_settings.as_ref(),
    )?;

    let domains: Vec<String> = config.domain_set().into_iter().collect();
    log.info_with(
      "requesting certificate",
      json!({ "ca": ca.provider.as_str(), "domains": domains }),
    );

    let request = IssueRequest {
      domains,
      key_algorithm: config.key_algorithm,
      propagation_wait: config.dns_propagation_wait.map(Duration::from_secs),
    };
    let issued = services
      .issuer
      .issue(&ca, &config.contact_email, &request, challenge.as_ref())
      .await?;

    let info = parse_certificate(&issued.certificate)?;
    let now = Utc::now();
    let certificate = Certificate {
      id: uuid::Uuid::new_v4().to_string(),
      source: CertificateSource::Workflow,
      subject_alt_names: Json(info.subject_alt_names),
      serial_number: info.serial_number,
      issuer_org: info.issuer_org,
      key_algorithm: config.key_algorithm.to_string(),
      certificate: issued.certificate,
      private_key: issued.private_key,
      issuer_certificate: issued.issuer_certificate,
      acme_account_url: Some(issued.account_url),
      acme_certificate_url: issued.certificate_url,
      effective_at: info.not_before,
      expire_at: info.not_after,
      workflow_id: Some(ctx.workflow_id.to_string()),
      workflow_run_id: Some(ctx.run_id.to_string()),
      workflow_node_id: Some(ctx.node.id.clone()),
      created_at: now,
      updated_at: now,
    };
    services
      .repositories
      .certificates
      .save_certificate(&certificate)
      .await?;

    let outcome = outcome(&certificate);
    save_output(ctx, &outcome).await?;
    log.info_with(
      "certificate issued",
      json!({ "certificateId": certificate.id, "expireAt": certificate.expire_at }),
    );
    Ok(outcome)
  }
}

fn outcome(certificate: &Certificate) -> NodeOutcome {
  NodeOutcome::new()
    .with_output("certificate", certificate.id.clone())
    .with_output(
      "daysLeft",
      (certificate.expire_at - Utc::now()).num_days(),
    )
}

/// The certificate from the node's last successful run, if it is far from
/// expiry and was issued for the same domains, key algorithm and CA.
async fn reusable_certificate(
  ctx: &NodeContext<'_>,
  config: &ApplyNodeConfig,
  log: &mut NodeLog,
) -> Result<Option<Certificate>, NodeError> {
  let repositories = &ctx.services.repositories;

  let Some(last) = repositories.outputs.get_output_by_node(&ctx.node.id).await? else {
    return Ok(None);
  };
  if !last.succeeded {
    return Ok(None);
  }

  match last.config::<ApplyNodeConfig>() {
    Ok(previous) if config.same_issuance_as(&previous) => {}
    _ => {
      log.info("configuration changed since the last issuance");
      return Ok(None);
    }
  }

  let Some(certificate) = repositories
    .certificates
    .get_certificate_by_node(&ctx.node.id)
    .await?
  else {
    return Ok(None);
  };

  let window = config
    .skip_before_expiry_days
    .map(|days| TimeDelta::days(i64::from(days)))
    .unwrap_or(ctx.config.apply.renewal_window);
  if certificate.expire_at - Utc::now() > window {
    Ok(Some(certificate))
  } else {
    log.info(format!(
      "certificate expires at {}, renewing",
      certificate.expire_at
    ));
    Ok(None)
  }
}
