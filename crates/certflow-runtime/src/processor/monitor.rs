use async_trait::async_trait;
use certflow_workflow::MonitorNodeConfig;
use chrono::Utc;
use serde_json::json;

use super::{NodeContext, NodeOutcome, NodeProcessor};
use crate::error::NodeError;
use crate::log::NodeLog;

/// Check the certificate a live endpoint serves.
///
/// Outputs `validated` and `daysLeft` for condition nodes downstream.
pub struct MonitorProcessor;

#[async_trait]
impl NodeProcessor for MonitorProcessor {
  async fn process(
    &self,
    ctx: &NodeContext<'_>,
    log: &mut NodeLog,
  ) -> Result<NodeOutcome, NodeError> {
    let config: MonitorNodeConfig = ctx.node.config()?;
    config.validate(&ctx.node.id)?;

    let inspected = ctx
      .services
      .inspector
      .inspect(&config.host, config.port, config.server_name())
      .await?;

    let days_left = (inspected.not_after - Utc::now()).num_days();
    let validated = inspected.validated && days_left >= 0;
    log.info_with(
      format!("inspected {}:{}", config.host, config.port),
      json!({
        "subjectAltNames": inspected.subject_alt_names,
        "issuer": inspected.issuer_org,
        "notAfter": inspected.not_after,
        "validated": validated,
        "daysLeft": days_left,
      }),
    );

    Ok(
      NodeOutcome::new()
        .with_output("validated", validated)
        .with_output("daysLeft", days_left),
    )
  }
}
