use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
  AcmeAccount, AcmeAccountRepository, Certificate, CertificateRepository, Error, RunFilter,
  Settings, SettingsRepository, Workflow, WorkflowOutput, WorkflowOutputRepository,
  WorkflowRepository, WorkflowRun, WorkflowRunRepository, WorkflowRunStatus,
};

const RUN_COLUMNS: &str =
  "id, workflow_id, status, trigger, started_at, ended_at, logs, error, detail, created_at";

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) the database at `url` and apply migrations.
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }

  /// Close the pool; later operations fail with a cancellation error.
  pub async fn close(&self) {
    self.pool.close().await;
  }
}

#[async_trait]
impl WorkflowRepository for SqliteStore {
  async fn get_workflow(&self, id: &str) -> Result<Workflow, Error> {
    sqlx::query_as(
      r#"
      SELECT id, name, enabled, trigger, trigger_cron, content, draft, has_draft,
             last_run_id, last_run_status, last_run_time, created_at, updated_at
      FROM workflows
      WHERE id = ?
      "#,
    )
    .bind(id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("workflow {id}")))
  }

  async fn save_workflow(&self, workflow: &Workflow) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO workflows (id, name, enabled, trigger, trigger_cron, content, draft, has_draft,
                             last_run_id, last_run_status, last_run_time, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET
        name = excluded.name,
        enabled = excluded.enabled,
        trigger = excluded.trigger,
        trigger_cron = excluded.trigger_cron,
        content = excluded.content,
        draft = excluded.draft,
        has_draft = excluded.has_draft,
        last_run_id = excluded.last_run_id,
        last_run_status = excluded.last_run_status,
        last_run_time = excluded.last_run_time,
        updated_at = excluded.updated_at
      "#,
    )
    .bind(&workflow.id)
    .bind(&workflow.name)
    .bind(workflow.enabled)
    .bind(workflow.trigger.as_str())
    .bind(&workflow.trigger_cron)
    .bind(&workflow.content)
    .bind(&workflow.draft)
    .bind(workflow.has_draft)
    .bind(&workflow.last_run_id)
    .bind(workflow.last_run_status)
    .bind(workflow.last_run_time)
    .bind(workflow.created_at)
    .bind(workflow.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn record_last_run(&self, run: &WorkflowRun) -> Result<(), Error> {
    sqlx::query(
      r#"
      UPDATE workflows
      SET last_run_id = ?, last_run_status = ?, last_run_time = ?, updated_at = ?
      WHERE id = ?
        AND (last_run_id IS NULL OR last_run_id = ?
             OR last_run_time IS NULL OR last_run_time <= ?)
      "#,
    )
    .bind(&run.id)
    .bind(run.status)
    .bind(run.created_at)
    .bind(Utc::now())
    .bind(&run.workflow_id)
    .bind(&run.id)
    .bind(run.created_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait]
impl WorkflowRunRepository for SqliteStore {
  async fn get_run(&self, id: &str) -> Result<WorkflowRun, Error> {
    sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = ?"))
      .bind(id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("workflow run {id}")))
  }

  async fn save_run(&self, run: &WorkflowRun) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO workflow_runs (id, workflow_id, status, trigger, started_at, ended_at, logs,
                                 error, detail, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET
        status = excluded.status,
        started_at = excluded.started_at,
        ended_at = excluded.ended_at,
        logs = excluded.logs,
        error = excluded.error,
        detail = excluded.detail
      "#,
    )
    .bind(&run.id)
    .bind(&run.workflow_id)
    .bind(run.status)
    .bind(run.trigger.as_str())
    .bind(run.started_at)
    .bind(run.ended_at)
    .bind(&run.logs)
    .bind(&run.error)
    .bind(&run.detail)
    .bind(run.created_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn list_runs(&self, workflow_id: &str) -> Result<Vec<WorkflowRun>, Error> {
    let runs = sqlx::query_as(&format!(
      "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE workflow_id = ? ORDER BY created_at DESC"
    ))
    .bind(workflow_id)
    .fetch_all(&self.pool)
    .await?;
    Ok(runs)
  }

  async fn list_runs_by_status(
    &self,
    status: WorkflowRunStatus,
  ) -> Result<Vec<WorkflowRun>, Error> {
    let runs = sqlx::query_as(&format!(
      "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE status = ? ORDER BY created_at ASC"
    ))
    .bind(status)
    .fetch_all(&self.pool)
    .await?;
    Ok(runs)
  }

  async fn delete_runs_where(&self, filter: &RunFilter) -> Result<u64, Error> {
    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM workflow_runs WHERE 1 = 1");
    if let Some(workflow_id) = &filter.workflow_id {
      query.push(" AND workflow_id = ").push_bind(workflow_id.clone());
    }
    if !filter.statuses.is_empty() {
      query.push(" AND status IN (");
      let mut separated = query.separated(", ");
      for status in &filter.statuses {
        separated.push_bind(*status);
      }
      separated.push_unseparated(")");
    }
    if let Some(cutoff) = filter.created_before {
      query.push(" AND created_at < ").push_bind(cutoff);
    }

    let result = query.build().execute(&self.pool).await?;
    Ok(result.rows_affected())
  }
}

#[async_trait]
impl WorkflowOutputRepository for SqliteStore {
  async fn get_output_by_node(&self, node_id: &str) -> Result<Option<WorkflowOutput>, Error> {
    let output = sqlx::query_as(
      r#"
      SELECT id, workflow_id, run_id, node_id, node_config, outputs, succeeded, created_at, updated_at
      FROM workflow_outputs
      WHERE node_id = ?
      "#,
    )
    .bind(node_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(output)
  }

  async fn save_output(&self, output: &WorkflowOutput) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO workflow_outputs (id, workflow_id, run_id, node_id, node_config, outputs,
                                    succeeded, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (node_id) DO UPDATE SET
        workflow_id = excluded.workflow_id,
        run_id = excluded.run_id,
        node_config = excluded.node_config,
        outputs = excluded.outputs,
        succeeded = excluded.succeeded,
        updated_at = excluded.updated_at
      "#,
    )
    .bind(&output.id)
    .bind(&output.workflow_id)
    .bind(&output.run_id)
    .bind(&output.node_id)
    .bind(&output.node_config)
    .bind(&output.outputs)
    .bind(output.succeeded)
    .bind(output.created_at)
    .bind(output.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

const CERTIFICATE_COLUMNS: &str = "id, source, subject_alt_names, serial_number, issuer_org, \
  key_algorithm, certificate, private_key, issuer_certificate, acme_account_url, \
  acme_certificate_url, effective_at, expire_at, workflow_id, workflow_run_id, workflow_node_id, \
  created_at, updated_at";

#[async_trait]
impl CertificateRepository for SqliteStore {
  async fn get_certificate(&self, id: &str) -> Result<Certificate, Error> {
    sqlx::query_as(&format!(
      "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("certificate {id}")))
  }

  async fn get_certificate_by_node(&self, node_id: &str) -> Result<Option<Certificate>, Error> {
    let certificate = sqlx::query_as(&format!(
      "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE workflow_node_id = ? \
       ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(node_id)
    .fetch_optional(&self.pool)
    .await?;
    Ok(certificate)
  }

  async fn save_certificate(&self, certificate: &Certificate) -> Result<(), Error> {
    sqlx::query(&format!(
      r#"
      INSERT INTO certificates ({CERTIFICATE_COLUMNS})
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (id) DO UPDATE SET
        subject_alt_names = excluded.subject_alt_names,
        serial_number = excluded.serial_number,
        issuer_org = excluded.issuer_org,
        key_algorithm = excluded.key_algorithm,
        certificate = excluded.certificate,
        private_key = excluded.private_key,
        issuer_certificate = excluded.issuer_certificate,
        acme_account_url = excluded.acme_account_url,
        acme_certificate_url = excluded.acme_certificate_url,
        effective_at = excluded.effective_at,
        expire_at = excluded.expire_at,
        updated_at = excluded.updated_at
      "#
    ))
    .bind(&certificate.id)
    .bind(certificate.source)
    .bind(&certificate.subject_alt_names)
    .bind(&certificate.serial_number)
    .bind(&certificate.issuer_org)
    .bind(&certificate.key_algorithm)
    .bind(&certificate.certificate)
    .bind(&certificate.private_key)
    .bind(&certificate.issuer_certificate)
    .bind(&certificate.acme_account_url)
    .bind(&certificate.acme_certificate_url)
    .bind(certificate.effective_at)
    .bind(certificate.expire_at)
    .bind(&certificate.workflow_id)
    .bind(&certificate.workflow_run_id)
    .bind(&certificate.workflow_node_id)
    .bind(certificate.created_at)
    .bind(certificate.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait]
impl AcmeAccountRepository for SqliteStore {
  async fn get_account(&self, ca: &str, email: &str) -> Result<Option<AcmeAccount>, Error> {
    let account = sqlx::query_as(
      r#"
      SELECT id, ca, email, private_key, resource, created_at
      FROM acme_accounts
      WHERE ca = ? AND email = ?
      "#,
    )
    .bind(ca)
    .bind(email)
    .fetch_optional(&self.pool)
    .await?;
    Ok(account)
  }

  async fn save_account(&self, account: &AcmeAccount) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO acme_accounts (id, ca, email, private_key, resource, created_at)
      VALUES (?, ?, ?, ?, ?, ?)
      ON CONFLICT (ca, email) DO UPDATE SET
        private_key = excluded.private_key,
        resource = excluded.resource
      "#,
    )
    .bind(&account.id)
    .bind(&account.ca)
    .bind(&account.email)
    .bind(&account.private_key)
    .bind(&account.resource)
    .bind(account.created_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait]
impl SettingsRepository for SqliteStore {
  async fn get_settings(&self, name: &str) -> Result<Option<Settings>, Error> {
    let settings = sqlx::query_as("SELECT name, content, updated_at FROM settings WHERE name = ?")
      .bind(name)
      .fetch_optional(&self.pool)
      .await?;
    Ok(settings)
  }

  async fn save_settings(&self, settings: &Settings) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO settings (name, content, updated_at)
      VALUES (?, ?, ?)
      ON CONFLICT (name) DO UPDATE SET
        content = excluded.content,
        updated_at = excluded.updated_at
      "#,
    )
    .bind(&settings.name)
    .bind(&settings.content)
    .bind(settings.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}
