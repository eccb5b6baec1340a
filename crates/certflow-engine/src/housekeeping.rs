//! Run bookkeeping that needs no dispatcher.

use certflow_store::{Repositories, RunFilter, Settings, WorkflowRunStatus};
use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::EngineError;

/// Shape of the `persistence` settings entry.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PersistenceSettings {
  workflow_runs_retention_max_days: u32,
}

/// Mark runs left `Pending` or `Running` by a previous process `Failed`.
pub async fn recover_interrupted_runs(repositories: &Repositories) -> Result<usize, EngineError> {
  let runs = &repositories.runs;
  let mut recovered = 0;
  for status in [WorkflowRunStatus::Pending, WorkflowRunStatus::Running] {
    for mut run in runs.list_runs_by_status(status).await? {
      warn!(run_id = %run.id, workflow_id = %run.workflow_id, "marking interrupted run failed");
      run.status = WorkflowRunStatus::Failed;
      run.error = Some("interrupted".to_string());
      run.ended_at = Some(Utc::now());
      runs.save_run(&run).await?;
      repositories.workflows.record_last_run(&run).await?;
      recovered += 1;
    }
  }
  Ok(recovered)
}

/// Delete terminal runs older than the `persistence` setting's
/// `workflowRunsRetentionMaxDays`.
///
/// Returns how many runs were removed; zero when no retention is set.
pub async fn cleanup_runs(repositories: &Repositories) -> Result<u64, EngineError> {
  let settings = repositories
    .settings
    .get_settings(Settings::PERSISTENCE)
    .await?
    .map(|s| s.content_as::<PersistenceSettings>())
    .transpose()?
    .unwrap_or_default();

  if settings.workflow_runs_retention_max_days == 0 {
    return Ok(0);
  }

  let cutoff = Utc::now() - TimeDelta::days(i64::from(settings.workflow_runs_retention_max_days));
  let deleted = repositories
    .runs
    .delete_runs_where(&RunFilter {
      workflow_id: None,
      statuses: vec![
        WorkflowRunStatus::Succeeded,
        WorkflowRunStatus::Failed,
        WorkflowRunStatus::Canceled,
      ],
      created_before: Some(cutoff),
    })
    .await?;
  info!(deleted, %cutoff, "expired runs removed");
  Ok(deleted)
}
