//! The database connection capability.

use tablemap_proto::Value;

use crate::error::Result;
use crate::row::Row;
use crate::statement::Statement;

/// A live database connection supplied by the caller.
///
/// Implementations bind `statement.parameters` by name or position as the
/// dialect's placeholder style requires, and report driver failures as
/// [`Error::Driver`](crate::Error::Driver). Statement text may contain
/// several statements joined by the dialect's separator (batch updates,
/// multi-result selects, upsert fallbacks); the connection runs them as
/// one round trip. Transactions are managed by the caller on the
/// connection itself.
pub trait Connection {
    /// Run a statement that returns no rows; returns the affected row count.
    fn execute(&self, statement: &Statement) -> Result<u64>;

    /// Run a statement and return every row of its first result set.
    fn query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run a statement producing one result set per contained select.
    fn query_multiple(&self, statement: &Statement) -> Result<Vec<Vec<Row>>>;

    /// First column of the first row, or `Value::Null` when there is none.
    ///
    /// Used for aggregates and for identity values returned by inserts.
    /// Connections whose dialect reports identities through a trailing
    /// `SELECT` must return that statement's value.
    fn scalar(&self, statement: &Statement) -> Result<Value> {
        Ok(self
            .query(statement)?
            .into_iter()
            .next()
            .and_then(Row::into_first)
            .unwrap_or(Value::Null))
    }
}
