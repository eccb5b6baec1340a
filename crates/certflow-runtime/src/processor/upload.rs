use async_trait::async_trait;
use certflow_acme::{parse_certificate, split_chain};
use certflow_store::{Certificate, CertificateSource, Json};
use certflow_workflow::UploadNodeConfig;
use chrono::Utc;

use super::{NodeContext, NodeOutcome, NodeProcessor, save_output};
use crate::error::NodeError;
use crate::log::NodeLog;

/// Store a user supplied certificate so later nodes can deploy it.
pub struct UploadProcessor;

#[async_trait]
impl NodeProcessor for UploadProcessor {
  async fn process(
    &self,
    ctx: &NodeContext<'_>,
    log: &mut NodeLog,
  ) -> Result<NodeOutcome, NodeError> {
    let config: UploadNodeConfig = ctx.node.config()?;
    config.validate(&ctx.node.id)?;
    let repositories = &ctx.services.repositories;

    if let Some(last) = repositories.outputs.get_output_by_node(&ctx.node.id).await? {
      let unchanged = last.succeeded
        && last
          .config::<UploadNodeConfig>()
          .is_ok_and(|previous| previous == config);
      if let (true, Some(id)) = (unchanged, last.output("certificate").and_then(|v| v.as_str()))
      {
        log.info("certificate unchanged since the last run, skipping");
        return Ok(NodeOutcome::new().with_output("certificate", id));
      }
    }

    let info = parse_certificate(&config.certificate)?;
    let (leaf, issuer) = split_chain(&config.certificate);
    let now = Utc::now();
    let certificate = Certificate {
      id: uuid::Uuid::new_v4().to_string(),
      source: CertificateSource::Upload,
      subject_alt_names: Json(info.subject_alt_names),
      serial_number: info.serial_number,
      issuer_org: info.issuer_org,
      key_algorithm: String::new(),
      certificate: leaf,
      private_key: config.private_key.clone(),
      issuer_certificate: issuer,
      acme_account_url: None,
      acme_certificate_url: None,
      effective_at: info.not_before,
      expire_at: info.not_after,
      workflow_id: Some(ctx.workflow_id.to_string()),
      workflow_run_id: Some(ctx.run_id.to_string()),
      workflow_node_id: Some(ctx.node.id.clone()),
      created_at: now,
      updated_at: now,
    };
    repositories.certificates.save_certificate(&certificate).await?;

    let outcome = NodeOutcome::new().with_output("certificate", certificate.id.clone());
    save_output(ctx, &outcome).await?;
    log.info(format!("stored uploaded certificate {}", certificate.id));
    Ok(outcome)
  }
}
