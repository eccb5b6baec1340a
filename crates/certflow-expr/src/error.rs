use thiserror::Error;

/// Errors raised while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
  /// The selector references a node that produced no outputs.
  #[error("no outputs bound for node '{node_id}'")]
  UnknownNode { node_id: String },

  /// The node exists but did not produce the named output.
  #[error("node '{node_id}' has no output named '{name}'")]
  UnknownOutput { node_id: String, name: String },

  /// The operator is not part of the language.
  #[error("unknown operator '{0}'")]
  UnknownOperator(String),

  /// A numeric comparison was applied to a non-numeric operand.
  #[error("operator '{op}' requires numeric operands, got {value}")]
  NotNumeric { op: String, value: serde_json::Value },

  /// A logical operator or negation was applied to a non-boolean operand.
  #[error("operator '{op}' requires boolean operands, got {value}")]
  NotBoolean { op: String, value: serde_json::Value },
}
