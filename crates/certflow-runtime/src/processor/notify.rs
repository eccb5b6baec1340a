use async_trait::async_trait;
use certflow_store::Settings;
use certflow_workflow::NotifyNodeConfig;
use serde_json::{Map, Value};

use super::{NodeContext, NodeOutcome, NodeProcessor};
use crate::error::NodeError;
use crate::log::NodeLog;

/// Send a message over a notification channel.
pub struct NotifyProcessor;

#[async_trait]
impl NodeProcessor for NotifyProcessor {
  async fn process(
    &self,
    ctx: &NodeContext<'_>,
    log: &mut NodeLog,
  ) -> Result<NodeOutcome, NodeError> {
    let config: NotifyNodeConfig = ctx.node.config()?;
    config.validate(&ctx.node.id)?;

    let channel_config = match config.channel_config.clone() {
      Some(channel_config) => channel_config,
      None => channel_from_settings(ctx, &config.channel).await?,
    };

    ctx
      .services
      .notifier
      .send(&config.channel, &config.subject, &config.message, &channel_config)
      .await?;
    log.info(format!("notification sent via {}", config.channel));
    Ok(NodeOutcome::new())
  }
}

/// The channel's entry in the `notifyChannels` settings.
async fn channel_from_settings(
  ctx: &NodeContext<'_>,
  channel: &str,
) -> Result<Map<String, Value>, NodeError> {
  let settings = ctx
    .services
    .repositories
    .settings
    .get_settings(Settings::NOTIFY_CHANNELS)
    .await?;

  match settings.as_ref().and_then(|s| s.content.get(channel)) {
    Some(Value::Object(config)) => Ok(config.clone()),
    _ => Err(NodeError::Failed(format!(
      "notify channel '{channel}' is not configured"
    ))),
  }
}
