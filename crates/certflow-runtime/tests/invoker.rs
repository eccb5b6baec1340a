//! Integration tests for Invoker::invoke routing and branch handling.

mod common;

use certflow_runtime::{BranchPolicy, RuntimeConfig, RuntimeError};
use certflow_workflow::{NodeDef, NodeType};
use common::{Harness, notify, visited};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// `start -> a -> erb{success: ok -> b, failure: failed -> c} -> d`
fn result_branch_workflow(a_channel: &str) -> NodeDef {
  NodeDef::new("start", NodeType::Start)
    .then(notify("a", a_channel, "a"))
    .then(
      NodeDef::new("erb", NodeType::ExecuteResultBranch).with_branches(vec![
        NodeDef::new("ok", NodeType::ExecuteSuccess).with_next(notify("b", "email", "b")),
        NodeDef::new("failed", NodeType::ExecuteFailure).with_next(notify("c", "email", "c")),
      ]),
    )
    .then(notify("d", "email", "d"))
}

#[tokio::test]
async fn test_failure_routes_to_failure_branch_then_continues() {
  let harness = Harness::new();
  let (result, logs) = harness.run(&result_branch_workflow("broken")).await;

  assert!(result.is_ok());
  assert_eq!(visited(&logs), vec!["start", "a", "failed", "c", "d"]);
  assert_eq!(harness.notifier.sent(), vec!["c", "d"]);
  assert!(logs[1].error.as_deref().unwrap().contains("channel unavailable"));
}

#[tokio::test]
async fn test_success_routes_to_success_branch_then_continues() {
  let harness = Harness::new();
  let (result, logs) = harness.run(&result_branch_workflow("email")).await;

  assert!(result.is_ok());
  assert_eq!(visited(&logs), vec!["start", "a", "ok", "b", "d"]);
  assert_eq!(harness.notifier.sent(), vec!["a", "b", "d"]);
  assert!(logs.iter().all(|log| log.error.is_none()));
}

#[tokio::test]
async fn test_unrouted_failure_ends_the_run() {
  let harness = Harness::new();
  let workflow = NodeDef::new("start", NodeType::Start)
    .then(notify("a", "broken", "a"))
    .then(notify("b", "email", "b"));

  let (result, logs) = harness.run(&workflow).await;

  match result {
    Err(RuntimeError::Node { node_id, .. }) => assert_eq!(node_id, "a"),
    other => panic!("expected node failure, got {other:?}"),
  }
  assert_eq!(visited(&logs), vec!["start", "a"]);
  assert!(harness.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_false_condition_skips_only_its_branch() {
  let harness = Harness::new();
  let workflow = NodeDef::new("start", NodeType::Start)
    .then(
      NodeDef::new("fork", NodeType::Branch).with_branches(vec![
        NodeDef::new("gate", NodeType::Condition)
          .with_config(json!({ "expression": { "type": "const", "value": false } }))
          .with_next(notify("gated", "email", "gated")),
        notify("other", "email", "other"),
      ]),
    )
    .then(notify("after", "email", "after"));

  let (result, logs) = harness.run(&workflow).await;

  assert!(result.is_ok());
  assert_eq!(harness.notifier.sent(), vec!["other", "after"]);
  assert!(!visited(&logs).contains(&"gated"));
}

#[tokio::test]
async fn test_false_condition_in_result_branch_resumes_after_it() {
  let harness = Harness::new();
  let workflow = NodeDef::new("start", NodeType::Start)
    .then(notify("a", "email", "a"))
    .then(
      NodeDef::new("erb", NodeType::ExecuteResultBranch).with_branches(vec![
        NodeDef::new("ok", NodeType::ExecuteSuccess).with_next(
          NodeDef::new("gate", NodeType::Condition)
            .with_config(json!({ "expression": { "type": "const", "value": false } }))
            .with_next(notify("b", "email", "b")),
        ),
        NodeDef::new("failed", NodeType::ExecuteFailure).with_next(notify("c", "email", "c")),
      ]),
    )
    .then(notify("d", "email", "d"));

  let (result, logs) = harness.run(&workflow).await;

  assert!(result.is_ok());
  assert_eq!(visited(&logs), vec!["start", "a", "ok", "gate", "d"]);
  assert_eq!(harness.notifier.sent(), vec!["a", "d"]);
}

fn monitor_then_renew() -> NodeDef {
  NodeDef::new("start", NodeType::Start)
    .then(
      NodeDef::new("monitor", NodeType::Monitor)
        .with_config(json!({ "host": "example.com", "port": 443 })),
    )
    .then(NodeDef::new("expiring", NodeType::Condition).with_config(json!({
      "expression": {
        "type": "compare",
        "op": "<",
        "left": { "type": "var", "selector": { "id": "monitor", "name": "daysLeft" } },
        "right": { "type": "const", "value": 10 }
      }
    })))
    .then(notify("renew", "email", "renew"))
}

#[tokio::test]
async fn test_condition_reads_earlier_outputs() {
  let soon = Harness::with_inspected_days(5);
  let (result, _) = soon.run(&monitor_then_renew()).await;
  assert!(result.is_ok());
  assert_eq!(soon.notifier.sent(), vec!["renew"]);

  let later = Harness::with_inspected_days(40);
  let (result, _) = later.run(&monitor_then_renew()).await;
  assert!(result.is_ok());
  assert!(later.notifier.sent().is_empty());
}

fn failing_branch_workflow() -> NodeDef {
  NodeDef::new("start", NodeType::Start)
    .then(NodeDef::new("fork", NodeType::Branch).with_branches(vec![
      notify("first", "broken", "first"),
      notify("second", "email", "second"),
    ]))
    .then(notify("after", "email", "after"))
}

#[tokio::test]
async fn test_best_effort_runs_every_branch() {
  let harness = Harness::new();
  let (result, logs) = harness.run(&failing_branch_workflow()).await;

  assert!(result.is_ok());
  assert_eq!(harness.notifier.sent(), vec!["second", "after"]);
  assert!(logs.iter().any(|log| log.error.is_some()));
}

#[tokio::test]
async fn test_fail_fast_stops_at_first_failing_branch() {
  let harness = Harness::new();
  let config = RuntimeConfig {
    branch_policy: BranchPolicy::FailFast,
    ..Default::default()
  };
  let (result, logs) = harness
    .run_with(&failing_branch_workflow(), config, &CancellationToken::new())
    .await;

  assert!(matches!(result, Err(RuntimeError::Node { .. })));
  assert!(harness.notifier.sent().is_empty());
  assert_eq!(visited(&logs), vec!["start", "first"]);
}

#[tokio::test]
async fn test_cancelled_token_stops_before_first_node() {
  let harness = Harness::new();
  let cancel = CancellationToken::new();
  cancel.cancel();

  let (result, logs) = harness
    .run_with(&result_branch_workflow("email"), RuntimeConfig::default(), &cancel)
    .await;

  assert!(matches!(result, Err(RuntimeError::Cancelled)));
  assert!(result.unwrap_err().is_cancellation());
  assert!(logs.is_empty());
}

#[tokio::test]
async fn test_unknown_node_type_fails_with_log_entry() {
  let harness = Harness::new();
  let workflow = NodeDef::new("start", NodeType::Start)
    .then(NodeDef::new("mystery", NodeType::Unknown("teleport".to_string())));

  let (result, logs) = harness.run(&workflow).await;

  assert!(matches!(
    result,
    Err(RuntimeError::UnsupportedNodeType { ref node_type, .. }) if node_type == "teleport"
  ));
  assert_eq!(visited(&logs), vec!["start", "mystery"]);
  assert!(logs[1].error.is_some());
}
