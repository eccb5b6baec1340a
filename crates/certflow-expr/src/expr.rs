use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExprError;
use crate::operator::{ComparisonOperator, LogicalOperator};

/// Node outputs visible to an expression: node id -> output name -> value.
pub type Bindings = HashMap<String, HashMap<String, Value>>;

/// Reference to an output produced by an earlier node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
  /// Id of the node that produced the output.
  pub id: String,
  /// Output name, e.g. `validated` or `daysLeft`.
  pub name: String,
}

/// An expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
  /// A literal value.
  Const { value: Value },
  /// The value of a node output.
  Var { selector: Selector },
  /// A binary comparison yielding a boolean.
  Compare {
    op: ComparisonOperator,
    left: Box<Expr>,
    right: Box<Expr>,
  },
  /// `and` / `or` over two boolean sub-expressions.
  Logical {
    op: LogicalOperator,
    left: Box<Expr>,
    right: Box<Expr>,
  },
  /// Boolean negation.
  Not { expr: Box<Expr> },
}

impl Expr {
  pub fn constant(value: impl Into<Value>) -> Self {
    Self::Const {
      value: value.into(),
    }
  }

  pub fn var(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self::Var {
      selector: Selector {
        id: id.into(),
        name: name.into(),
      },
    }
  }

  pub fn compare(op: ComparisonOperator, left: Expr, right: Expr) -> Self {
    Self::Compare {
      op,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn and(left: Expr, right: Expr) -> Self {
    Self::Logical {
      op: LogicalOperator::And,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn or(left: Expr, right: Expr) -> Self {
    Self::Logical {
      op: LogicalOperator::Or,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn negate(expr: Expr) -> Self {
    Self::Not {
      expr: Box::new(expr),
    }
  }

  /// Evaluate the expression against the given bindings.
  ///
  /// Both operands of every binary node are evaluated, so a dangling
  /// selector is reported even when the other side alone would decide the
  /// result.
  pub fn eval(&self, bindings: &Bindings) -> Result<Value, ExprError> {
    match self {
      Self::Const { value } => Ok(value.clone()),
      Self::Var { selector } => lookup(selector, bindings),
      Self::Compare { op, left, right } => {
        let left = left.eval(bindings)?;
        let right = right.eval(bindings)?;
        compare(op, &left, &right).map(Value::Bool)
      }
      Self::Logical { op, left, right } => {
        if let LogicalOperator::Unknown(op) = op {
          return Err(ExprError::UnknownOperator(op.clone()));
        }
        let name = op.as_str();
        let left = expect_bool(name, left.eval(bindings)?)?;
        let right = expect_bool(name, right.eval(bindings)?)?;
        Ok(Value::Bool(match op {
          LogicalOperator::Or => left || right,
          _ => left && right,
        }))
      }
      Self::Not { expr } => {
        let value = expect_bool("not", expr.eval(bindings)?)?;
        Ok(Value::Bool(!value))
      }
    }
  }

  /// Evaluate the expression and require a boolean result.
  pub fn eval_bool(&self, bindings: &Bindings) -> Result<bool, ExprError> {
    expect_bool("condition", self.eval(bindings)?)
  }

  /// Ids of every node referenced by a selector in this tree.
  pub fn referenced_nodes(&self) -> Vec<&str> {
    let mut ids = Vec::new();
    self.collect_references(&mut ids);
    ids
  }

  fn collect_references<'a>(&'a self, ids: &mut Vec<&'a str>) {
    match self {
      Self::Const { .. } => {}
      Self::Var { selector } => ids.push(&selector.id),
      Self::Compare { left, right, .. } | Self::Logical { left, right, .. } => {
        left.collect_references(ids);
        right.collect_references(ids);
      }
      Self::Not { expr } => expr.collect_references(ids),
    }
  }
}

fn lookup(selector: &Selector, bindings: &Bindings) -> Result<Value, ExprError> {
  let outputs = bindings
    .get(&selector.id)
    .ok_or_else(|| ExprError::UnknownNode {
      node_id: selector.id.clone(),
    })?;

  outputs
    .get(&selector.name)
    .cloned()
    .ok_or_else(|| ExprError::UnknownOutput {
      node_id: selector.id.clone(),
      name: selector.name.clone(),
    })
}

fn compare(
  op: &ComparisonOperator,
  left: &Value,
  right: &Value,
) -> Result<bool, ExprError> {
  match op {
    ComparisonOperator::Equal | ComparisonOperator::Is => Ok(values_equal(left, right)),
    ComparisonOperator::NotEqual => Ok(!values_equal(left, right)),
    ComparisonOperator::GreaterThan => numeric(op, left, right).map(|(l, r)| l > r),
    ComparisonOperator::LessThan => numeric(op, left, right).map(|(l, r)| l < r),
    ComparisonOperator::GreaterOrEqual => numeric(op, left, right).map(|(l, r)| l >= r),
    ComparisonOperator::LessOrEqual => numeric(op, left, right).map(|(l, r)| l <= r),
    ComparisonOperator::Unknown(op) => Err(ExprError::UnknownOperator(op.clone())),
  }
}

/// Value equality without coercion across types. Numbers compare by
/// magnitude so an integer output equals the same float literal.
fn values_equal(left: &Value, right: &Value) -> bool {
  match (left, right) {
    (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
    _ => left == right,
  }
}

fn numeric(op: &ComparisonOperator, left: &Value, right: &Value) -> Result<(f64, f64), ExprError> {
  let as_number = |value: &Value| {
    value.as_f64().ok_or_else(|| ExprError::NotNumeric {
      op: op.to_string(),
      value: value.clone(),
    })
  };
  Ok((as_number(left)?, as_number(right)?))
}

fn expect_bool(op: &str, value: Value) -> Result<bool, ExprError> {
  value.as_bool().ok_or(ExprError::NotBoolean {
    op: op.to_string(),
    value,
  })
}
