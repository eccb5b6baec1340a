use async_trait::async_trait;
use certflow_workflow::DeployNodeConfig;
use serde_json::Value;

use super::{NodeContext, NodeOutcome, NodeProcessor, save_output};
use crate::error::NodeError;
use crate::log::NodeLog;
use crate::services::DeployerRequest;

/// Push the certificate of an earlier node to a deploy target.
pub struct DeployProcessor;

#[async_trait]
impl NodeProcessor for DeployProcessor {
  async fn process(
    &self,
    ctx: &NodeContext<'_>,
    log: &mut NodeLog,
  ) -> Result<NodeOutcome, NodeError> {
    let config: DeployNodeConfig = ctx.node.config()?;
    config.validate(&ctx.node.id)?;
    let source = config.certificate_source(&ctx.node.id)?;
    let repositories = &ctx.services.repositories;

    let certificate = repositories
      .certificates
      .get_certificate_by_node(source)
      .await?
      .ok_or_else(|| NodeError::Failed(format!("node '{source}' has produced no certificate")))?;

    if config.skip_on_last_succeeded {
      if let Some(last) = repositories.outputs.get_output_by_node(&ctx.node.id).await? {
        let same_certificate =
          last.output("certificate") == Some(&Value::String(certificate.id.clone()));
        let same_config = last
          .config::<DeployNodeConfig>()
          .is_ok_and(|previous| previous == config);
        if last.succeeded && same_certificate && same_config {
          log.info("certificate already deployed by the last run, skipping");
          return Ok(NodeOutcome::new().with_output("certificate", certificate.id));
        }
      }
    }

    let deployer = ctx.services.deployers.deployer(&DeployerRequest {
      provider: config.provider.clone(),
      access_id: config.provider_access_id.clone(),
      config: config.provider_config.clone(),
    })?;

    let chain = format!("{}{}", certificate.certificate, certificate.issuer_certificate);
    let result = deployer
      .deploy(ctx.cancel, &chain, &certificate.private_key)
      .await?;
    log.info_with(
      format!("deployed to {}", config.provider),
      Value::Object(result.details),
    );

    let outcome = NodeOutcome::new().with_output("certificate", certificate.id);
    save_output(ctx, &outcome).await?;
    Ok(outcome)
  }
}
