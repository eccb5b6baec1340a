//! Integration tests for the Dispatcher using a scripted run invoker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use certflow_engine::{
  Dispatcher, DispatcherConfig, EngineError, RetryPolicy, RunInvoker, RunReport, WorkflowWorkItem,
};
use certflow_runtime::RuntimeError;
use certflow_store::{
  Error as StoreError, MemoryStore, Repositories, RunFilter, RunLog, Workflow, WorkflowRepository,
  WorkflowRun, WorkflowRunRepository, WorkflowRunStatus,
};
use certflow_workflow::{NodeDef, NodeType, WorkflowTrigger};
use tokio_util::sync::CancellationToken;

/// Invoker that sleeps per run and records what it saw.
#[derive(Default)]
struct ScriptedInvoker {
  delay: Duration,
  /// Runs whose single log entry carries an error.
  failing: Vec<String>,
  started: Mutex<Vec<String>>,
  running: Mutex<HashMap<String, usize>>,
  overlapped: AtomicBool,
  concurrent: AtomicUsize,
  max_concurrent: AtomicUsize,
}

impl ScriptedInvoker {
  fn with_delay(delay: Duration) -> Self {
    Self {
      delay,
      ..Default::default()
    }
  }

  fn started(&self) -> Vec<String> {
    self.started.lock().unwrap().clone()
  }
}

#[async_trait]
impl RunInvoker for ScriptedInvoker {
  async fn invoke(&self, run: &WorkflowRun, cancel: &CancellationToken) -> RunReport {
    {
      let mut running = self.running.lock().unwrap();
      let count = running.entry(run.workflow_id.clone()).or_default();
      *count += 1;
      if *count > 1 {
        self.overlapped.store(true, Ordering::SeqCst);
      }
    }
    self.started.lock().unwrap().push(run.id.clone());
    let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_concurrent.fetch_max(now, Ordering::SeqCst);

    let result = tokio::select! {
      _ = tokio::time::sleep(self.delay) => Ok(()),
      _ = cancel.cancelled() => Err(RuntimeError::Cancelled),
    };

    self.concurrent.fetch_sub(1, Ordering::SeqCst);
    *self
      .running
      .lock()
      .unwrap()
      .get_mut(&run.workflow_id)
      .unwrap() -= 1;

    RunReport {
      logs: vec![RunLog {
        node_id: "start".to_string(),
        node_name: "Start".to_string(),
        records: Vec::new(),
        error: self
          .failing
          .contains(&run.id)
          .then(|| "deployer unreachable".to_string()),
      }],
      result,
    }
  }
}

fn content() -> NodeDef {
  NodeDef::new("start", NodeType::Start).then(NodeDef::new("end", NodeType::End))
}

async fn seed(store: &MemoryStore, workflow_id: &str, run_ids: &[&str]) {
  store
    .save_workflow(&Workflow::new(workflow_id, workflow_id, content()))
    .await
    .unwrap();
  for run_id in run_ids {
    store
      .save_run(&WorkflowRun::pending(
        *run_id,
        workflow_id,
        WorkflowTrigger::Manual,
        content(),
      ))
      .await
      .unwrap();
  }
}

fn config(max_workers: usize) -> DispatcherConfig {
  DispatcherConfig {
    max_workers,
    persist_retry: RetryPolicy {
      max_attempts: 2,
      backoff: Duration::from_millis(10),
    },
  }
}

fn dispatcher(
  store: &Arc<MemoryStore>,
  invoker: &Arc<ScriptedInvoker>,
  max_workers: usize,
) -> Dispatcher {
  Dispatcher::new(
    config(max_workers),
    &Repositories::from_store(store.clone()),
    invoker.clone(),
  )
}

/// Run repository whose next `failures` saves fail with a database error.
struct FlakyRuns {
  store: Arc<MemoryStore>,
  failures: AtomicUsize,
  saves: AtomicUsize,
}

impl FlakyRuns {
  fn new(store: &Arc<MemoryStore>, failures: usize) -> Self {
    Self {
      store: store.clone(),
      failures: AtomicUsize::new(failures),
      saves: AtomicUsize::new(0),
    }
  }
}

#[async_trait]
impl WorkflowRunRepository for FlakyRuns {
  async fn get_run(&self, id: &str) -> Result<WorkflowRun, StoreError> {
    self.store.get_run(id).await
  }

  async fn save_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
    self.saves.fetch_add(1, Ordering::SeqCst);
    let failing = self
      .failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok();
    if failing {
      return Err(StoreError::Database(sqlx::Error::Protocol(
        "disk I/O error".to_string(),
      )));
    }
    self.store.save_run(run).await
  }

  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRun>, StoreError> {
    self.store.list_runs(workflow_id).await
  }

  async fn list_runs_by_status(
    &self,
    status: WorkflowRunStatus,
  ) -> Result<Vec<WorkflowRun>, StoreError> {
    self.store.list_runs_by_status(status).await
  }

  async fn delete_runs_where(&self, filter: &RunFilter) -> Result<u64, StoreError> {
    self.store.delete_runs_where(filter).await
  }
}

fn flaky_dispatcher(
  store: &Arc<MemoryStore>,
  runs: &Arc<FlakyRuns>,
  invoker: &Arc<ScriptedInvoker>,
) -> Dispatcher {
  let mut repositories = Repositories::from_store(store.clone());
  repositories.runs = runs.clone();
  Dispatcher::new(config(4), &repositories, invoker.clone())
}

async fn wait_for_status(store: &MemoryStore, run_id: &str, status: WorkflowRunStatus) {
  for _ in 0..500 {
    if store.get_run(run_id).await.unwrap().status == status {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!(
    "run {run_id} never reached {status:?}, last status {:?}",
    store.get_run(run_id).await.unwrap().status
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runs_of_one_workflow_never_overlap_and_keep_order() {
  let store = Arc::new(MemoryStore::new());
  let runs = ["a-1", "a-2", "a-3", "a-4", "a-5"];
  seed(&store, "wf-a", &runs).await;
  let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_millis(30)));
  let dispatcher = dispatcher(&store, &invoker, 4);

  for run_id in runs {
    dispatcher
      .dispatch(WorkflowWorkItem::new("wf-a", run_id))
      .unwrap();
  }
  for run_id in runs {
    wait_for_status(&store, run_id, WorkflowRunStatus::Succeeded).await;
  }

  assert!(!invoker.overlapped.load(Ordering::SeqCst));
  assert_eq!(invoker.started(), runs);

  let workflow = store.get_workflow("wf-a").await.unwrap();
  assert_eq!(workflow.last_run_status, Some(WorkflowRunStatus::Succeeded));
  dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_workflows_run_concurrently_within_the_pool() {
  let store = Arc::new(MemoryStore::new());
  for workflow_id in ["wf-a", "wf-b", "wf-c"] {
    seed(&store, workflow_id, &[&format!("{workflow_id}-run")]).await;
  }
  let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_millis(150)));
  let dispatcher = dispatcher(&store, &invoker, 2);

  for workflow_id in ["wf-a", "wf-b", "wf-c"] {
    dispatcher
      .dispatch(WorkflowWorkItem::new(workflow_id, format!("{workflow_id}-run")))
      .unwrap();
  }
  for workflow_id in ["wf-a", "wf-b", "wf-c"] {
    wait_for_status(&store, &format!("{workflow_id}-run"), WorkflowRunStatus::Succeeded).await;
  }

  assert_eq!(invoker.max_concurrent.load(Ordering::SeqCst), 2);
  dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelling_a_queued_run_never_invokes_it() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1", "a-2"]).await;
  let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_millis(200)));
  let dispatcher = dispatcher(&store, &invoker, 4);

  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  wait_for_status(&store, "a-1", WorkflowRunStatus::Running).await;
  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-2"))
    .unwrap();

  dispatcher.cancel("a-2").await.unwrap();
  assert_eq!(
    store.get_run("a-2").await.unwrap().status,
    WorkflowRunStatus::Canceled
  );

  wait_for_status(&store, "a-1", WorkflowRunStatus::Succeeded).await;
  assert_eq!(invoker.started(), vec!["a-1"]);
  assert_eq!(dispatcher.queued(), 0);
  dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelling_an_executing_run_marks_it_canceled() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1"]).await;
  let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_secs(30)));
  let dispatcher = dispatcher(&store, &invoker, 4);

  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  wait_for_status(&store, "a-1", WorkflowRunStatus::Running).await;

  dispatcher.cancel("a-1").await.unwrap();
  wait_for_status(&store, "a-1", WorkflowRunStatus::Canceled).await;
  dispatcher.shutdown().await;
  assert!(!dispatcher.is_active("wf-a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_node_error_in_logs_fails_the_run() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1"]).await;
  let invoker = Arc::new(ScriptedInvoker {
    failing: vec!["a-1".to_string()],
    ..Default::default()
  });
  let dispatcher = dispatcher(&store, &invoker, 4);

  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  wait_for_status(&store, "a-1", WorkflowRunStatus::Failed).await;

  let run = store.get_run("a-1").await.unwrap();
  assert_eq!(
    run.error.as_deref(),
    Some("node 'Start' failed: deployer unreachable")
  );
  assert_eq!(run.logs.0.len(), 1);
  assert!(run.started_at.is_some() && run.ended_at.is_some());
  dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_no_longer_pending_is_skipped() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1", "a-2"]).await;
  let mut stale = store.get_run("a-1").await.unwrap();
  stale.status = WorkflowRunStatus::Canceled;
  store.save_run(&stale).await.unwrap();

  let invoker = Arc::new(ScriptedInvoker::default());
  let dispatcher = dispatcher(&store, &invoker, 4);
  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-2"))
    .unwrap();
  wait_for_status(&store, "a-2", WorkflowRunStatus::Succeeded).await;

  assert_eq!(invoker.started(), vec!["a-2"]);
  dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_discards_queue_and_cancels_workers() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1", "a-2"]).await;
  let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_secs(30)));
  let dispatcher = dispatcher(&store, &invoker, 4);

  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  wait_for_status(&store, "a-1", WorkflowRunStatus::Running).await;
  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-2"))
    .unwrap();

  tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
    .await
    .unwrap();

  assert_eq!(
    store.get_run("a-1").await.unwrap().status,
    WorkflowRunStatus::Canceled
  );
  assert_eq!(
    store.get_run("a-2").await.unwrap().status,
    WorkflowRunStatus::Pending
  );
  assert_eq!(invoker.started(), vec!["a-1"]);
  assert!(matches!(
    dispatcher.dispatch(WorkflowWorkItem::new("wf-a", "a-2")),
    Err(EngineError::ShutDown)
  ));
}

#[tokio::test]
async fn test_dispatch_rejects_empty_ids() {
  let store = Arc::new(MemoryStore::new());
  let invoker = Arc::new(ScriptedInvoker::default());
  let dispatcher = dispatcher(&store, &invoker, 1);

  assert!(matches!(
    dispatcher.dispatch(WorkflowWorkItem::new("", "run")),
    Err(EngineError::InvalidWorkItem(_))
  ));
  assert!(matches!(
    dispatcher.dispatch(WorkflowWorkItem::new("wf", " ")),
    Err(EngineError::InvalidWorkItem(_))
  ));
  assert_eq!(dispatcher.queued(), 0);
  dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_closed_store_abandons_the_run() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1"]).await;
  let invoker = Arc::new(ScriptedInvoker::with_delay(Duration::from_millis(100)));
  let dispatcher = dispatcher(&store, &invoker, 4);

  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  for _ in 0..500 {
    if !invoker.started().is_empty() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  store.close();

  tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
    .await
    .unwrap();
  assert!(!dispatcher.is_active("wf-a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_persistence_error_is_retried() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1"]).await;
  let runs = Arc::new(FlakyRuns::new(&store, 1));
  let invoker = Arc::new(ScriptedInvoker::default());
  let dispatcher = flaky_dispatcher(&store, &runs, &invoker);

  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  wait_for_status(&store, "a-1", WorkflowRunStatus::Succeeded).await;

  // running: one failure and its retry, then the terminal save
  assert_eq!(runs.saves.load(Ordering::SeqCst), 3);
  assert_eq!(invoker.started(), vec!["a-1"]);
  assert!(store.get_run("a-1").await.unwrap().error.is_none());
  dispatcher.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exhausted_persistence_retries_fail_the_run() {
  let store = Arc::new(MemoryStore::new());
  seed(&store, "wf-a", &["a-1"]).await;
  let runs = Arc::new(FlakyRuns::new(&store, 2));
  let invoker = Arc::new(ScriptedInvoker::default());
  let dispatcher = flaky_dispatcher(&store, &runs, &invoker);

  dispatcher
    .dispatch(WorkflowWorkItem::new("wf-a", "a-1"))
    .unwrap();
  wait_for_status(&store, "a-1", WorkflowRunStatus::Failed).await;

  let run = store.get_run("a-1").await.unwrap();
  let error = run.error.unwrap();
  assert!(error.starts_with("persistence error: "), "{error}");
  assert!(error.contains("disk I/O error"), "{error}");
  assert!(run.ended_at.is_some());
  assert_eq!(runs.saves.load(Ordering::SeqCst), 3);
  assert!(invoker.started().is_empty());

  let workflow = store.get_workflow("wf-a").await.unwrap();
  assert_eq!(workflow.last_run_id.as_deref(), Some("a-1"));
  assert_eq!(workflow.last_run_status, Some(WorkflowRunStatus::Failed));

  tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
    .await
    .unwrap();
  assert!(!dispatcher.is_active("wf-a"));
}
