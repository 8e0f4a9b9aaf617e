//! Statement building.
//!
//! The [`StatementBuilder`] turns a [`ClassMap`](crate::catalog::ClassMap),
//! an optional predicate and operation options into SQL text plus an
//! ordered parameter list, in the syntax of one [`Dialect`]. It is pure:
//! the same inputs always produce the same text and parameter order.

mod builder;
pub mod dialect;
mod writer;

use std::fmt;

use serde::{Deserialize, Serialize};

use tablemap_proto::{OrderField, Value};

pub use builder::{SelectRequest, StatementBuilder};
pub use dialect::{
    Dialect, IdentitySyntax, MySql, PagingSyntax, PlaceholderStyle, Postgres, SqlServer, Sqlite,
    UpsertSyntax,
};

/// What a statement does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Paged,
    Aggregate,
    Exists,
    Insert,
    Update,
    Delete,
    Truncate,
    Merge,
    BatchInsert,
    BatchUpdate,
    BatchMerge,
    MultiResult,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Paged => "paged",
            StatementKind::Aggregate => "aggregate",
            StatementKind::Exists => "exists",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Truncate => "truncate",
            StatementKind::Merge => "merge",
            StatementKind::BatchInsert => "batch_insert",
            StatementKind::BatchUpdate => "batch_update",
            StatementKind::BatchMerge => "batch_merge",
            StatementKind::MultiResult => "multi_result",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

/// SQL text plus its parameters, in binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
    pub parameters: Vec<Parameter>,
    /// Entity rows written by this statement (batch chunks report their size).
    pub rows: usize,
    /// Field whose value the statement returns as a scalar, if any.
    pub returning: Option<String>,
}

impl Statement {
    pub(crate) fn new(kind: StatementKind, sql: String, parameters: Vec<Parameter>) -> Self {
        Self {
            kind,
            sql,
            parameters,
            rows: 0,
            returning: None,
        }
    }

    /// Parameter values in binding order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.parameters.iter().map(|p| &p.value)
    }

    /// Value bound under `name`.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregate {
    Count,
    Sum,
    Min,
    Max,
    Average,
}

impl Aggregate {
    pub(crate) fn function(&self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
            Aggregate::Average => "AVG",
        }
    }

    pub(crate) fn alias(&self) -> &'static str {
        match self {
            Aggregate::Count => "CountValue",
            Aggregate::Sum => "SumValue",
            Aggregate::Min => "MinValue",
            Aggregate::Max => "MaxValue",
            Aggregate::Average => "AverageValue",
        }
    }
}

/// Options for a select.
///
/// Ordering ties fall back to the database's row order; add a unique field
/// to `order_by` when a stable order matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectOptions {
    pub order_by: Vec<OrderField>,
    pub top: Option<u64>,
    /// Fields to project. None selects every mapped field.
    pub fields: Option<Vec<String>>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, order: OrderField) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn top(mut self, top: u64) -> Self {
        self.top = Some(top);
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}
