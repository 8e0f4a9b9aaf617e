//! Expression validation errors.

use thiserror::Error;

use crate::query::Operator;

/// Errors raised while constructing or validating a query expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The operand does not carry the number of values the operator requires.
    #[error("operator {operator} expects {expected}, got {actual}")]
    Arity {
        operator: Operator,
        expected: &'static str,
        actual: usize,
    },

    /// A null value was compared with an operator other than IS NULL / IS NOT NULL.
    #[error("field '{field}' cannot be compared to null with {operator}; use IsNull or IsNotNull")]
    NullComparison { field: String, operator: Operator },

    /// A nested group has no children.
    #[error("query group is empty")]
    EmptyGroup,

    /// A field name is empty or otherwise unusable.
    #[error("invalid field name: {0:?}")]
    InvalidField(String),

    /// A value cannot be represented as requested.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
