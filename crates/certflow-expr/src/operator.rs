use std::fmt;

use serde::{Deserialize, Serialize};

/// Comparison operators.
///
/// Operators are read from their symbolic form. Anything unrecognized is kept
/// as [`ComparisonOperator::Unknown`] so a stored workflow still loads and the
/// problem surfaces as an evaluation error on the condition node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComparisonOperator {
  GreaterThan,
  LessThan,
  GreaterOrEqual,
  LessOrEqual,
  Equal,
  NotEqual,
  Is,
  Unknown(String),
}

impl ComparisonOperator {
  pub fn as_str(&self) -> &str {
    match self {
      Self::GreaterThan => ">",
      Self::LessThan => "<",
      Self::GreaterOrEqual => ">=",
      Self::LessOrEqual => "<=",
      Self::Equal => "==",
      Self::NotEqual => "!=",
      Self::Is => "is",
      Self::Unknown(op) => op,
    }
  }
}

impl From<String> for ComparisonOperator {
  fn from(op: String) -> Self {
    match op.as_str() {
      ">" => Self::GreaterThan,
      "<" => Self::LessThan,
      ">=" => Self::GreaterOrEqual,
      "<=" => Self::LessOrEqual,
      "==" => Self::Equal,
      "!=" => Self::NotEqual,
      "is" => Self::Is,
      _ => Self::Unknown(op),
    }
  }
}

impl From<ComparisonOperator> for String {
  fn from(op: ComparisonOperator) -> Self {
    op.as_str().to_string()
  }
}

impl fmt::Display for ComparisonOperator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Logical connectives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogicalOperator {
  And,
  Or,
  Unknown(String),
}

impl LogicalOperator {
  pub fn as_str(&self) -> &str {
    match self {
      Self::And => "and",
      Self::Or => "or",
      Self::Unknown(op) => op,
    }
  }
}

impl From<String> for LogicalOperator {
  fn from(op: String) -> Self {
    match op.as_str() {
      "and" => Self::And,
      "or" => Self::Or,
      _ => Self::Unknown(op),
    }
  }
}

impl From<LogicalOperator> for String {
  fn from(op: LogicalOperator) -> Self {
    op.as_str().to_string()
  }
}

impl fmt::Display for LogicalOperator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
