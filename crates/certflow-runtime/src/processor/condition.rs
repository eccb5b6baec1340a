use async_trait::async_trait;
use certflow_workflow::ConditionNodeConfig;

use super::{NodeContext, NodeOutcome, NodeProcessor};
use crate::error::NodeError;
use crate::log::NodeLog;

/// Gate a chain on an expression over earlier outputs.
pub struct ConditionProcessor;

#[async_trait]
impl NodeProcessor for ConditionProcessor {
  async fn process(
    &self,
    ctx: &NodeContext<'_>,
    log: &mut NodeLog,
  ) -> Result<NodeOutcome, NodeError> {
    let config: ConditionNodeConfig = ctx.node.config()?;
    let Some(expression) = config.expression else {
      log.info("no expression configured, continuing");
      return Ok(NodeOutcome::new());
    };

    if expression.eval_bool(ctx.variables)? {
      log.info("condition met");
      Ok(NodeOutcome::new())
    } else {
      log.info("condition not met, skipping branch");
      Ok(NodeOutcome::skip_branch())
    }
  }
}
