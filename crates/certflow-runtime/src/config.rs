use std::str::FromStr;

use chrono::TimeDelta;

/// How sibling branches of a `branch` node react to a failing branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BranchPolicy {
  /// Run every branch; a failure is only recorded in the run log.
  #[default]
  BestEffort,
  /// Stop at the first failing branch and fail the parent chain.
  FailFast,
}

impl FromStr for BranchPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "best_effort" | "best-effort" => Ok(Self::BestEffort),
      "fail_fast" | "fail-fast" => Ok(Self::FailFast),
      other => Err(format!("unknown branch policy '{other}'")),
    }
  }
}

/// Defaults for apply nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySettings {
  /// Renew once the current certificate expires within this window.
  pub renewal_window: TimeDelta,
}

impl Default for ApplySettings {
  fn default() -> Self {
    Self {
      renewal_window: TimeDelta::days(10),
    }
  }
}

/// Configuration for the run interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
  pub branch_policy: BranchPolicy,
  pub apply: ApplySettings,
}
