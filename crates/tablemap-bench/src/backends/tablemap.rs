//! The tablemap engine over rusqlite.

use std::sync::Arc;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Batch;
use tablemap_core::statement::{SelectOptions, Sqlite, Statement};
use tablemap_core::{Connection, Engine, EngineConfig, Error, Result, Row};
use tablemap_proto::{QueryField, QueryGroup, Value};
use tracing::trace;

use super::USER_SCHEMA;
use crate::fixtures::{generate_users, Scale, User};

/// A [`Connection`] over an in-memory rusqlite database.
///
/// Each statement is split into its `;`-separated parts; parameters bind by
/// `@name` and parts that return columns become result sets.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

struct ResultSet {
    has_columns: bool,
    rows: Vec<Row>,
    changes: u64,
}

impl SqliteConnection {
    pub fn open() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(Error::driver)?;
        Ok(Self { conn })
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).map_err(Error::driver)
    }

    fn run(&self, statement: &Statement) -> Result<Vec<ResultSet>> {
        trace!(kind = %statement.kind, parameters = statement.parameters.len(), "running statement");
        let mut sets = Vec::new();
        let mut batch = Batch::new(&self.conn, &statement.sql);
        while let Some(mut stmt) = batch.next().map_err(Error::driver)? {
            for parameter in &statement.parameters {
                let placeholder = format!("@{}", parameter.name);
                if let Some(index) = stmt.parameter_index(&placeholder).map_err(Error::driver)? {
                    stmt.raw_bind_parameter(index, to_sql(&parameter.value))
                        .map_err(Error::driver)?;
                }
            }

            if stmt.column_count() == 0 {
                let changes = stmt.raw_execute().map_err(Error::driver)? as u64;
                sets.push(ResultSet {
                    has_columns: false,
                    rows: Vec::new(),
                    changes,
                });
                continue;
            }

            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = Vec::new();
            let mut cursor = stmt.raw_query();
            while let Some(sql_row) = cursor.next().map_err(Error::driver)? {
                let mut row = Row::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    row.push(name.clone(), from_sql(sql_row.get_ref(i).map_err(Error::driver)?));
                }
                rows.push(row);
            }
            sets.push(ResultSet {
                has_columns: true,
                rows,
                changes: 0,
            });
        }
        Ok(sets)
    }
}

impl Connection for SqliteConnection {
    fn execute(&self, statement: &Statement) -> Result<u64> {
        Ok(self.run(statement)?.iter().map(|set| set.changes).sum())
    }

    fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        Ok(self
            .run(statement)?
            .into_iter()
            .find(|set| set.has_columns)
            .map(|set| set.rows)
            .unwrap_or_default())
    }

    fn query_multiple(&self, statement: &Statement) -> Result<Vec<Vec<Row>>> {
        Ok(self
            .run(statement)?
            .into_iter()
            .filter(|set| set.has_columns)
            .map(|set| set.rows)
            .collect())
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int32(i) => SqlValue::Integer(i64::from(*i)),
        Value::Int64(i) | Value::Timestamp(i) => SqlValue::Integer(*i),
        Value::Float32(f) => SqlValue::Real(f64::from(*f)),
        Value::Float64(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Uuid(u) => SqlValue::Blob(u.to_vec()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

/// tablemap backend for benchmarks.
pub struct TablemapBackend {
    engine: Engine,
    conn: SqliteConnection,
}

impl TablemapBackend {
    /// Create an empty database with the `User` table.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let conn = SqliteConnection::open().expect("Failed to open SQLite in-memory database");
        conn.execute_batch(USER_SCHEMA).expect("Failed to create schema");
        let engine = Engine::with_config(Arc::new(Sqlite), config).expect("Invalid engine config");
        Self { engine, conn }
    }

    /// Create a database populated at `scale`.
    pub fn with_scale(scale: Scale) -> Self {
        let backend = Self::new();
        backend.insert_users(&generate_users(scale.count()));
        backend
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn connection(&self) -> &SqliteConnection {
        &self.conn
    }

    /// Batched insert through the engine.
    pub fn insert_users(&self, users: &[User]) -> u64 {
        self.engine
            .insert_all(&self.conn, users)
            .expect("Failed to insert users")
    }

    pub fn scan_users(&self) -> Vec<User> {
        self.select(None, &SelectOptions::new())
    }

    pub fn scan_users_limit(&self, limit: u64) -> Vec<User> {
        self.select(None, &SelectOptions::new().top(limit))
    }

    pub fn filter_users_by_status(&self, status: &str) -> Vec<User> {
        let filter = QueryGroup::from(QueryField::eq("Status", status).expect("valid filter"));
        self.select(Some(&filter), &SelectOptions::new())
    }

    pub fn filter_users_by_age_gt(&self, age: i32) -> Vec<User> {
        let filter = QueryGroup::from(QueryField::gt("Age", age).expect("valid filter"));
        self.select(Some(&filter), &SelectOptions::new())
    }

    pub fn count_users(&self) -> u64 {
        self.engine
            .count::<User>(&self.conn, None)
            .expect("Failed to count users")
    }

    pub fn delete_all(&self) -> u64 {
        self.engine
            .delete::<User>(&self.conn, None)
            .expect("Failed to delete users")
    }

    fn select(&self, filter: Option<&QueryGroup>, options: &SelectOptions) -> Vec<User> {
        self.engine
            .query::<User>(&self.conn, filter, options)
            .expect("Failed to query users")
    }
}

impl Default for TablemapBackend {
    fn default() -> Self {
        Self::new()
    }
}
