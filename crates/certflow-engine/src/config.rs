use std::str::FromStr;
use std::time::Duration;

use certflow_runtime::{BranchPolicy, RuntimeConfig};
use tracing::warn;

/// Overrides [`DispatcherConfig::max_workers`].
pub const MAX_WORKERS_ENV: &str = "CERTFLOW_WORKFLOW_MAX_WORKERS";
/// Overrides [`RuntimeConfig::branch_policy`]: `best_effort` or `fail_fast`.
pub const BRANCH_POLICY_ENV: &str = "CERTFLOW_BRANCH_POLICY";

const DEFAULT_MAX_WORKERS: usize = 16;

/// Bounded retry for run persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, the first one included.
  pub max_attempts: u32,
  /// Pause between two attempts.
  pub backoff: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      backoff: Duration::from_millis(200),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
  /// Runs executing at the same time, across all workflows.
  pub max_workers: usize,
  pub persist_retry: RetryPolicy,
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      max_workers: DEFAULT_MAX_WORKERS,
      persist_retry: RetryPolicy::default(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
  pub dispatcher: DispatcherConfig,
  pub runtime: RuntimeConfig,
}

impl EngineConfig {
  /// Defaults overlaid with the `CERTFLOW_*` environment variables.
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let mut config = Self::default();

    if let Some(value) = lookup(MAX_WORKERS_ENV) {
      match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => config.dispatcher.max_workers = n,
        _ => warn!(var = MAX_WORKERS_ENV, %value, "ignoring invalid environment value"),
      }
    }

    if let Some(value) = lookup(BRANCH_POLICY_ENV) {
      match BranchPolicy::from_str(&value) {
        Ok(policy) => config.runtime.branch_policy = policy,
        Err(e) => warn!(var = BRANCH_POLICY_ENV, error = %e, "ignoring invalid environment value"),
      }
    }

    config
  }
}
