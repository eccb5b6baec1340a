//! Certflow Expressions
//!
//! A small, typed expression language evaluated against the outputs of
//! previously executed workflow nodes. Condition nodes hold one of these
//! trees and use the result to decide whether their branch runs.
//!
//! Expressions are serialized as JSON with a `"type"` discriminator:
//!
//! ```json
//! {
//!   "type": "logical",
//!   "op": "and",
//!   "left": {
//!     "type": "compare",
//!     "op": "is",
//!     "left": { "type": "var", "selector": { "id": "monitor", "name": "validated" } },
//!     "right": { "type": "const", "value": true }
//!   },
//!   "right": {
//!     "type": "compare",
//!     "op": "<=",
//!     "left": { "type": "var", "selector": { "id": "monitor", "name": "daysLeft" } },
//!     "right": { "type": "const", "value": 10 }
//!   }
//! }
//! ```
//!
//! Evaluation is pure: it never performs I/O and never mutates the tree.

mod error;
mod expr;
mod operator;

pub use error::ExprError;
pub use expr::{Bindings, Expr, Selector};
pub use operator::{ComparisonOperator, LogicalOperator};
