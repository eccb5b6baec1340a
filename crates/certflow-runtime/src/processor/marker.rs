use async_trait::async_trait;

use super::{NodeContext, NodeOutcome, NodeProcessor};
use crate::error::NodeError;
use crate::log::NodeLog;

/// `start`, `end` and the result branch heads: they only mark progress.
pub struct MarkerProcessor;

#[async_trait]
impl NodeProcessor for MarkerProcessor {
  async fn process(
    &self,
    ctx: &NodeContext<'_>,
    log: &mut NodeLog,
  ) -> Result<NodeOutcome, NodeError> {
    log.info(format!("reached {}", ctx.node.node_type));
    Ok(NodeOutcome::new())
  }
}
