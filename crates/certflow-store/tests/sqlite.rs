use certflow_store::{
  AcmeAccount, AcmeAccountRepository, RegistrationResource, RunFilter, RunLog, Settings,
  SettingsRepository, SqliteStore, Workflow, WorkflowRepository, WorkflowRun,
  WorkflowRunRepository, WorkflowRunStatus,
};
use certflow_workflow::{NodeDef, NodeType, WorkflowTrigger};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::types::Json;

async fn open() -> (tempfile::TempDir, SqliteStore) {
  let dir = tempfile::tempdir().unwrap();
  let url = format!("sqlite://{}", dir.path().join("certflow.db").display());
  let store = SqliteStore::connect(&url).await.unwrap();
  (dir, store)
}

fn graph() -> NodeDef {
  NodeDef::new("start", NodeType::Start).then(NodeDef::new("end", NodeType::End))
}

#[tokio::test]
async fn test_workflow_round_trip_and_upsert() {
  let (_dir, store) = open().await;

  let mut workflow = Workflow::new("w1", "renew example.com", graph());
  store.save_workflow(&workflow).await.unwrap();

  workflow.last_run_id = Some("r1".to_string());
  workflow.last_run_status = Some(WorkflowRunStatus::Succeeded);
  workflow.last_run_time = Some(Utc::now());
  store.save_workflow(&workflow).await.unwrap();

  let loaded = store.get_workflow("w1").await.unwrap();
  assert_eq!(loaded.trigger, WorkflowTrigger::Manual);
  assert_eq!(loaded.last_run_status, Some(WorkflowRunStatus::Succeeded));
  assert_eq!(loaded.content.map(|c| c.0), Some(graph()));
}

#[tokio::test]
async fn test_run_logs_and_status_queries() {
  let (_dir, store) = open().await;

  let mut run = WorkflowRun::pending("r1", "w1", WorkflowTrigger::Scheduled, graph());
  store.save_run(&run).await.unwrap();

  run.status = WorkflowRunStatus::Failed;
  run.error = Some("boom".to_string());
  run.logs = Json(vec![RunLog {
    node_id: "start".to_string(),
    node_name: "Start".to_string(),
    records: Vec::new(),
    error: Some("boom".to_string()),
  }]);
  store.save_run(&run).await.unwrap();

  let loaded = store.get_run("r1").await.unwrap();
  assert_eq!(loaded.status, WorkflowRunStatus::Failed);
  assert_eq!(loaded.trigger, WorkflowTrigger::Scheduled);
  assert_eq!(loaded.logs.len(), 1);

  assert!(store
    .list_runs_by_status(WorkflowRunStatus::Pending)
    .await
    .unwrap()
    .is_empty());
  assert_eq!(
    store
      .list_runs_by_status(WorkflowRunStatus::Failed)
      .await
      .unwrap()
      .len(),
    1
  );
}

#[tokio::test]
async fn test_delete_runs_older_than_cutoff() {
  let (_dir, store) = open().await;

  for (id, age_days) in [("old", 40), ("new", 1)] {
    let mut run = WorkflowRun::pending(id, "w1", WorkflowTrigger::Manual, graph());
    run.status = WorkflowRunStatus::Succeeded;
    run.created_at = Utc::now() - Duration::days(age_days);
    store.save_run(&run).await.unwrap();
  }

  let filter = RunFilter {
    workflow_id: Some("w1".to_string()),
    statuses: vec![WorkflowRunStatus::Succeeded, WorkflowRunStatus::Failed],
    created_before: Some(Utc::now() - Duration::days(30)),
  };
  assert_eq!(store.delete_runs_where(&filter).await.unwrap(), 1);

  let remaining = store.list_runs("w1").await.unwrap();
  assert_eq!(remaining.len(), 1);
  assert_eq!(remaining[0].id, "new");
}

#[tokio::test]
async fn test_account_unique_per_ca_and_email() {
  let (_dir, store) = open().await;

  let account = AcmeAccount {
    id: "a1".to_string(),
    ca: "letsencrypt".to_string(),
    email: "a@b.com".to_string(),
    private_key: "{}".to_string(),
    resource: Json(RegistrationResource {
      uri: "https://acme.example/acct/1".to_string(),
      body: json!({ "status": "valid" }),
    }),
    created_at: Utc::now(),
  };
  store.save_account(&account).await.unwrap();
  store
    .save_account(&AcmeAccount {
      id: "a2".to_string(),
      ..account.clone()
    })
    .await
    .unwrap();

  let loaded = store
    .get_account("letsencrypt", "a@b.com")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(loaded.id, "a1");
  assert_eq!(loaded.resource.uri, "https://acme.example/acct/1");
  assert!(store.get_account("zerossl", "a@b.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_settings_round_trip() {
  let (_dir, store) = open().await;

  store
    .save_settings(&Settings::new(
      Settings::PERSISTENCE,
      json!({ "workflowRunsRetentionMaxDays": 30 }),
    ))
    .await
    .unwrap();

  let settings = store
    .get_settings(Settings::PERSISTENCE)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(settings.content["workflowRunsRetentionMaxDays"], 30);
}

#[tokio::test]
async fn test_closed_pool_is_a_cancellation() {
  let (_dir, store) = open().await;
  store.close().await;

  let err = store.get_run("r1").await.unwrap_err();
  assert!(err.is_cancellation());
}

#[tokio::test]
async fn test_record_last_run_only_touches_last_run_fields() {
  let (_dir, store) = open().await;
  store
    .save_workflow(&Workflow::new("w1", "renew example.com", graph()))
    .await
    .unwrap();

  let mut older = WorkflowRun::pending("r1", "w1", WorkflowTrigger::Manual, graph());
  older.created_at = Utc::now() - Duration::seconds(10);
  let mut newer = WorkflowRun::pending("r2", "w1", WorkflowTrigger::Manual, graph());
  store.record_last_run(&newer).await.unwrap();

  let mut renamed = store.get_workflow("w1").await.unwrap();
  renamed.name = "renew and deploy".to_string();
  store.save_workflow(&renamed).await.unwrap();

  older.status = WorkflowRunStatus::Succeeded;
  store.record_last_run(&older).await.unwrap();
  let loaded = store.get_workflow("w1").await.unwrap();
  assert_eq!(loaded.last_run_id.as_deref(), Some("r2"));
  assert_eq!(loaded.last_run_status, Some(WorkflowRunStatus::Pending));

  newer.status = WorkflowRunStatus::Failed;
  store.record_last_run(&newer).await.unwrap();
  let loaded = store.get_workflow("w1").await.unwrap();
  assert_eq!(loaded.last_run_status, Some(WorkflowRunStatus::Failed));
  assert_eq!(loaded.name, "renew and deploy");

  let orphan = WorkflowRun::pending("r3", "gone", WorkflowTrigger::Manual, graph());
  store.record_last_run(&orphan).await.unwrap();
}
