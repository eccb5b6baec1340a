//! Run dispatcher.
//!
//! The [`Dispatcher`] queues run requests and executes them on a bounded pool
//! of workers, never more than one run of the same workflow at a time. Runs of
//! one workflow start in the order they were dispatched.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use certflow_store::{
  Error as StoreError, Json, Repositories, WorkflowRepository, WorkflowRun,
  WorkflowRunRepository, WorkflowRunStatus,
};
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};

use crate::config::{DispatcherConfig, RetryPolicy};
use crate::error::EngineError;
use crate::invoker::{RunInvoker, RunReport};

/// A request to execute a persisted `Pending` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowWorkItem {
  pub workflow_id: String,
  pub run_id: String,
}

impl WorkflowWorkItem {
  pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
    Self {
      workflow_id: workflow_id.into(),
      run_id: run_id.into(),
    }
  }
}

/// Workers currently holding a slot.
#[derive(Default)]
struct ActiveWorkers {
  /// workflow id -> run id
  by_workflow: HashMap<String, String>,
  /// run id -> the worker's cancellation token
  by_run: HashMap<String, CancellationToken>,
}

impl ActiveWorkers {
  fn register(&mut self, item: &WorkflowWorkItem, cancel: CancellationToken) {
    self
      .by_workflow
      .insert(item.workflow_id.clone(), item.run_id.clone());
    self.by_run.insert(item.run_id.clone(), cancel);
  }

  fn deregister(&mut self, item: &WorkflowWorkItem) {
    self.by_workflow.remove(&item.workflow_id);
    self.by_run.remove(&item.run_id);
  }
}

struct Inner {
  retry: RetryPolicy,
  runs: Arc<dyn WorkflowRunRepository>,
  workflows: Arc<dyn WorkflowRepository>,
  invoker: Arc<dyn RunInvoker>,
  slots: Arc<Semaphore>,
  // Lock order: queue before active.
  queue: Mutex<VecDeque<WorkflowWorkItem>>,
  active: Mutex<ActiveWorkers>,
  wake: mpsc::Sender<()>,
  tracker: TaskTracker,
  shutdown: CancellationToken,
}

/// Executes dispatched runs on a bounded worker pool.
pub struct Dispatcher {
  inner: Arc<Inner>,
  dequeue_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
  /// Create the dispatcher and start its dequeue loop on the current runtime.
  pub fn new(
    config: DispatcherConfig,
    repositories: &Repositories,
    invoker: Arc<dyn RunInvoker>,
  ) -> Self {
    let (wake, wakeups) = mpsc::channel(1);
    let inner = Arc::new(Inner {
      retry: config.persist_retry,
      runs: repositories.runs.clone(),
      workflows: repositories.workflows.clone(),
      invoker,
      slots: Arc::new(Semaphore::new(config.max_workers.max(1))),
      queue: Mutex::new(VecDeque::new()),
      active: Mutex::new(ActiveWorkers::default()),
      wake,
      tracker: TaskTracker::new(),
      shutdown: CancellationToken::new(),
    });

    let dequeue_loop = tokio::spawn(inner.clone().dequeue_loop(wakeups));
    info!(max_workers = config.max_workers, "dispatcher started");

    Self {
      inner,
      dequeue_loop: Mutex::new(Some(dequeue_loop)),
    }
  }

  /// Queue a run. Never blocks.
  pub fn dispatch(&self, item: WorkflowWorkItem) -> Result<(), EngineError> {
    if item.workflow_id.trim().is_empty() {
      return Err(EngineError::InvalidWorkItem("workflow id is empty".to_string()));
    }
    if item.run_id.trim().is_empty() {
      return Err(EngineError::InvalidWorkItem("run id is empty".to_string()));
    }
    if self.inner.shutdown.is_cancelled() {
      return Err(EngineError::ShutDown);
    }

    info!(workflow_id = %item.workflow_id, run_id = %item.run_id, "run queued");
    self.inner.queue.lock().push_back(item);
    self.inner.notify();
    Ok(())
  }

  /// Cancel a run.
  ///
  /// An executing run has its token cancelled and stops at the next node
  /// boundary. A queued run is removed and marked `Canceled` before this
  /// returns. Unknown or finished runs are left alone.
  pub async fn cancel(&self, run_id: &str) -> Result<(), EngineError> {
    let queued = {
      let mut queue = self.inner.queue.lock();
      let active = self.inner.active.lock();
      if let Some(token) = active.by_run.get(run_id) {
        info!(run_id, "cancelling executing run");
        token.cancel();
        return Ok(());
      }
      match queue.iter().position(|item| item.run_id == run_id) {
        Some(index) => queue.remove(index),
        None => None,
      }
    };

    let Some(item) = queued else {
      return Ok(());
    };
    info!(workflow_id = %item.workflow_id, run_id, "cancelling queued run");

    let mut run = self.inner.retry(|| self.inner.runs.get_run(run_id)).await?;
    if run.status != WorkflowRunStatus::Pending {
      return Ok(());
    }
    run.status = WorkflowRunStatus::Canceled;
    run.ended_at = Some(Utc::now());
    self.inner.finish(&run).await?;
    Ok(())
  }

  /// Stop accepting work, drop queued runs, cancel executing ones and wait
  /// for every worker to return.
  ///
  /// Dropped runs stay `Pending` in storage.
  pub async fn shutdown(&self) {
    let discarded = {
      let mut queue = self.inner.queue.lock();
      let discarded = queue.len();
      queue.clear();
      discarded
    };
    info!(discarded, "dispatcher shutting down");

    self.inner.shutdown.cancel();
    let dequeue_loop = self.dequeue_loop.lock().take();
    if let Some(handle) = dequeue_loop
      && let Err(e) = handle.await
    {
      error!(error = %e, "dequeue loop panicked");
    }

    self.inner.tracker.close();
    self.inner.tracker.wait().await;
    info!("dispatcher stopped");
  }

  /// Number of queued runs.
  pub fn queued(&self) -> usize {
    self.inner.queue.lock().len()
  }

  /// Whether a run of `workflow_id` is executing.
  pub fn is_active(&self, workflow_id: &str) -> bool {
    self.inner.active.lock().by_workflow.contains_key(workflow_id)
  }
}

impl Inner {
  /// Wake the dequeue loop. A full channel means a pass is already pending.
  fn notify(&self) {
    let _ = self.wake.try_send(());
  }

  async fn dequeue_loop(self: Arc<Self>, mut wakeups: mpsc::Receiver<()>) {
    loop {
      self.drain();
      tokio::select! {
        _ = self.shutdown.cancelled() => break,
        wakeup = wakeups.recv() => {
          if wakeup.is_none() {
            break;
          }
        }
      }
    }
  }

  /// Start queued runs while slots are free.
  ///
  /// Picks the oldest queued run whose workflow has no active worker, so
  /// runs of one workflow keep their dispatch order.
  fn drain(self: &Arc<Self>) {
    loop {
      if self.shutdown.is_cancelled() {
        return;
      }
      // No slot: a finishing worker wakes the loop again.
      let Ok(permit) = self.slots.clone().try_acquire_owned() else {
        return;
      };

      let (item, cancel) = {
        let mut queue = self.queue.lock();
        let mut active = self.active.lock();
        let Some(index) = queue
          .iter()
          .position(|item| !active.by_workflow.contains_key(&item.workflow_id))
        else {
          return;
        };
        let Some(item) = queue.remove(index) else {
          return;
        };
        let cancel = self.shutdown.child_token();
        active.register(&item, cancel.clone());
        (item, cancel)
      };

      let inner = self.clone();
      self.tracker.spawn(inner.work(item, cancel, permit));
    }
  }

  #[instrument(
    name = "workflow_worker",
    skip(self, cancel, permit),
    fields(workflow_id = %item.workflow_id, run_id = %item.run_id)
  )]
  async fn work(
    self: Arc<Self>,
    item: WorkflowWorkItem,
    cancel: CancellationToken,
    permit: OwnedSemaphorePermit,
  ) {
    if let Err(e) = self.execute(&item, &cancel).await {
      if e.is_cancellation() {
        warn!(error = %e, "store closed, abandoning run");
      } else {
        error!(error = %e, "run persistence failed");
        self.mark_failed(&item.run_id, &e).await;
      }
    }

    self.active.lock().deregister(&item);
    drop(permit);
    self.notify();
  }

  async fn execute(
    &self,
    item: &WorkflowWorkItem,
    cancel: &CancellationToken,
  ) -> Result<(), StoreError> {
    let mut run = self.retry(|| self.runs.get_run(&item.run_id)).await?;
    if run.status != WorkflowRunStatus::Pending {
      info!(status = run.status.as_str(), "run is no longer pending, skipping");
      return Ok(());
    }

    if cancel.is_cancelled() {
      info!("run cancelled before it started");
      run.status = WorkflowRunStatus::Canceled;
      run.ended_at = Some(Utc::now());
      return self.finish(&run).await;
    }

    run.status = WorkflowRunStatus::Running;
    run.started_at = Some(Utc::now());
    self.retry(|| self.runs.save_run(&run)).await?;
    info!("run started");

    let report = self.invoker.invoke(&run, cancel).await;
    let (status, error) = outcome(&report);
    run.status = status;
    run.error = error;
    run.logs = Json(report.logs);
    run.ended_at = Some(Utc::now());
    match run.status {
      WorkflowRunStatus::Failed => {
        warn!(error = run.error.as_deref().unwrap_or_default(), "run failed")
      }
      status => info!(status = status.as_str(), "run finished"),
    }
    self.finish(&run).await
  }

  /// Persist a terminal run and point its workflow at it.
  async fn finish(&self, run: &WorkflowRun) -> Result<(), StoreError> {
    self.retry(|| self.runs.save_run(run)).await?;
    self.retry(|| self.workflows.record_last_run(run)).await
  }

  /// Last attempt after retries ran out: mark the run `Failed`.
  async fn mark_failed(&self, run_id: &str, cause: &StoreError) {
    let result = async {
      let mut run = self.runs.get_run(run_id).await?;
      if run.status.is_terminal() {
        return Ok(());
      }
      run.status = WorkflowRunStatus::Failed;
      run.error = Some(format!("persistence error: {cause}"));
      run.ended_at = Some(Utc::now());
      self.runs.save_run(&run).await?;
      self.workflows.record_last_run(&run).await
    }
    .await;

    if let Err(e) = result {
      error!(run_id, error = %e, "could not mark run failed");
    }
  }

  async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    let mut attempt = 1;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(e) if e.is_cancellation() || attempt >= self.retry.max_attempts => return Err(e),
        Err(e) => {
          warn!(attempt, error = %e, "persistence failed, retrying");
          attempt += 1;
          tokio::time::sleep(self.retry.backoff).await;
        }
      }
    }
  }
}

/// Terminal status and error message of a finished run.
///
/// Cancellation wins. Otherwise the run failed if the interpreter returned an
/// error or any node logged one, even a routed failure.
fn outcome(report: &RunReport) -> (WorkflowRunStatus, Option<String>) {
  match &report.result {
    Err(e) if e.is_cancellation() => (WorkflowRunStatus::Canceled, None),
    Err(e) => (WorkflowRunStatus::Failed, Some(e.to_string())),
    Ok(()) => match report.logs.iter().find(|log| log.error.is_some()) {
      Some(log) => (
        WorkflowRunStatus::Failed,
        Some(format!(
          "node '{}' failed: {}",
          log.node_name,
          log.error.as_deref().unwrap_or_default()
        )),
      ),
      None => (WorkflowRunStatus::Succeeded, None),
    },
  }
}
