use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
  AcmeAccount, AcmeAccountRepository, Certificate, CertificateRepository, Error, RunFilter,
  Settings, SettingsRepository, Workflow, WorkflowOutput, WorkflowOutputRepository,
  WorkflowRepository, WorkflowRun, WorkflowRunRepository, WorkflowRunStatus,
};

/// In-process store. Every table is a map guarded by its own lock.
#[derive(Default)]
pub struct MemoryStore {
  closed: AtomicBool,
  workflows: RwLock<HashMap<String, Workflow>>,
  runs: RwLock<HashMap<String, WorkflowRun>>,
  outputs: RwLock<HashMap<String, WorkflowOutput>>,
  certificates: RwLock<HashMap<String, Certificate>>,
  accounts: RwLock<HashMap<(String, String), AcmeAccount>>,
  settings: RwLock<HashMap<String, Settings>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject every further operation with [`Error::Closed`].
  pub fn close(&self) {
    self.closed.store(true, Ordering::SeqCst);
  }

  fn check_open(&self) -> Result<(), Error> {
    if self.closed.load(Ordering::SeqCst) {
      return Err(Error::Closed);
    }
    Ok(())
  }
}

#[async_trait]
impl WorkflowRepository for MemoryStore {
  async fn get_workflow(&self, id: &str) -> Result<Workflow, Error> {
    self.check_open()?;
    self
      .workflows
      .read()
      .get(id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("workflow {id}")))
  }

  async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Error> {
    self.check_open()?;
    self
      .workflows
      .write()
      .insert(workflow.id.clone(), workflow.clone());
    Ok(())
  }

  async fn record_last_run(&self, run: &WorkflowRun) -> Result<(), Error> {
    self.check_open()?;
    let mut workflows = self.workflows.write();
    let Some(workflow) = workflows.get_mut(&run.workflow_id) else {
      return Ok(());
    };
    let owned_by_newer = workflow
      .last_run_id
      .as_deref()
      .is_some_and(|id| id != run.id)
      && workflow
        .last_run_time
        .is_some_and(|time| time > run.created_at);
    if owned_by_newer {
      return Ok(());
    }

    workflow.last_run_id = Some(run.id.clone());
    workflow.last_run_status = Some(run.status);
    workflow.last_run_time = Some(run.created_at);
    workflow.updated_at = Utc::now();
    Ok(())
  }
}

#[async_trait]
impl WorkflowRunRepository for MemoryStore {
  async fn get_run(&self, id: &str) -> Result<WorkflowRun, Error> {
    self.check_open()?;
    self
      .runs
      .read()
      .get(id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("workflow run {id}")))
  }

  async fn save_run(&self, run: &WorkflowRun) -> Result<(), Error> {
    self.check_open()?;
    self.runs.write().insert(run.id.clone(), run.clone());
    Ok(())
  }

  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRun>, Error> {
    self.check_open()?;
    let mut runs: Vec<_> = self
      .runs
      .read()
      .values()
      .filter(|r| r.workflow_id == workflow_id)
      .cloned()
      .collect();
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(runs)
  }

  async fn list_runs_by_status(
    &self,
    status: WorkflowRunStatus,
  ) -> Result<Vec<WorkflowRun>, Error> {
    self.check_open()?;
    let mut runs: Vec<_> = self
      .runs
      .read()
      .values()
      .filter(|r| r.status == status)
      .cloned()
      .collect();
    runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(runs)
  }

  async fn delete_runs_where(&self, filter: &RunFilter) -> Result<u64, Error> {
    self.check_open()?;
    let mut runs = self.runs.write();
    let before = runs.len();
    runs.retain(|_, run| !filter.matches(run));
    Ok((before - runs.len()) as u64)
  }
}

#[async_trait]
impl WorkflowOutputRepository for MemoryStore {
  async fn get_output_by_node(&self, node_id: &str) -> Result<Option<WorkflowOutput>, Error> {
    self.check_open()?;
    Ok(self.outputs.read().get(node_id).cloned())
  }

  async fn save_output(&self, output: &WorkflowOutput) -> Result<(), Error> {
    self.check_open()?;
    let mut outputs = self.outputs.write();
    let mut output = output.clone();
    // Upsert keeps the identity and creation time of the existing row.
    if let Some(existing) = outputs.get(&output.node_id) {
      output.id = existing.id.clone();
      output.created_at = existing.created_at;
    }
    outputs.insert(output.node_id.clone(), output);
    Ok(())
  }
}

#[async_trait]
impl CertificateRepository for MemoryStore {
  async fn get_certificate(&self, id: &str) -> Result<Certificate, Error> {
    self.check_open()?;
    self
      .certificates
      .read()
      .get(id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("certificate {id}")))
  }

  async fn get_certificate_by_node(&self, node_id: &str) -> Result<Option<Certificate>, Error> {
    self.check_open()?;
    Ok(
      self
        .certificates
        .read()
        .values()
        .filter(|c| c.workflow_node_id.as_deref() == Some(node_id))
        .max_by_key(|c| c.created_at)
        .cloned(),
    )
  }

  async fn save_certificate(&self, certificate: &Certificate) -> Result<(), Error> {
    self.check_open()?;
    self
      .certificates
      .write()
      .insert(certificate.id.clone(), certificate.clone());
    Ok(())
  }
}

#[async_trait]
impl AcmeAccountRepository for MemoryStore {
  async fn get_account(&self, ca: &str, email: &str) -> Result<Option<AcmeAccount>, Error> {
    self.check_open()?;
    Ok(
      self
        .accounts
        .read()
        .get(&(ca.to_string(), email.to_string()))
        .cloned(),
    )
  }

  async fn save_account(&self, account: &AcmeAccount) -> Result<(), Error> {
    self.check_open()?;
    self.accounts.write().insert(
      (account.ca.clone(), account.email.clone()),
      account.clone(),
    );
    Ok(())
  }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
  async fn get_settings(&self, name: &str) -> Result<Option<Settings>, Error> {
    self.check_open()?;
    Ok(self.settings.read().get(name).cloned())
  }

  async fn save_settings(&self, settings: &Settings) -> Result<(), Error> {
    self.check_open()?;
    self
      .settings
      .write()
      .insert(settings.name.clone(), settings.clone());
    Ok(())
  }
}
