//! Shared fixtures: a rusqlite-backed connection and test entities.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Batch;

use tablemap_core::catalog::{Entity, EntityDescriptor};
use tablemap_core::handler::EnumMapHandler;
use tablemap_core::statement::{Statement, Sqlite};
use tablemap_core::{Connection, Engine, EngineConfig, Error, Result, Row};
use tablemap_proto::{FieldType, ScalarType, Value};

/// In-memory SQLite database.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    round_trips: AtomicUsize,
}

struct ResultSet {
    has_columns: bool,
    rows: Vec<Row>,
    changes: u64,
}

impl SqliteConnection {
    pub fn open() -> Self {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE "Person" (
                "Id" INTEGER PRIMARY KEY AUTOINCREMENT,
                "Name" TEXT NOT NULL,
                "Age" INTEGER NULL,
                "Direction" TEXT NOT NULL,
                "Score" REAL NOT NULL
            );
            CREATE TABLE "Setting" (
                "Name" TEXT PRIMARY KEY,
                "Value" TEXT NOT NULL
            );
            "#,
        )
        .unwrap();
        Self {
            conn,
            round_trips: AtomicUsize::new(0),
        }
    }

    /// The underlying connection, for assertions on stored data.
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Statements sent through the `Connection` trait so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    fn run(&self, statement: &Statement) -> Result<Vec<ResultSet>> {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
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
                    let value = sql_row.get_ref(i).map_err(Error::driver)?;
                    row.push(name.clone(), from_sql(value));
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

/// Route engine logs to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> Engine {
    init_tracing();
    Engine::new(Arc::new(Sqlite))
}

pub fn engine_with(config: EngineConfig) -> Engine {
    init_tracing();
    Engine::with_config(Arc::new(Sqlite), config).unwrap()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    West,
    East,
}

impl Direction {
    fn name(self) -> &'static str {
        match self {
            Direction::West => "West",
            Direction::East => "East",
        }
    }

    fn parse(name: &str) -> std::result::Result<Self, tablemap_proto::Error> {
        match name {
            "West" => Ok(Direction::West),
            "East" => Ok(Direction::East),
            other => Err(tablemap_proto::Error::InvalidValue(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: Option<i32>,
    pub direction: Direction,
    pub score: f64,
}

impl Person {
    pub fn new(name: &str, age: Option<i32>, direction: Direction, score: f64) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            age,
            direction,
            score,
        }
    }
}

impl Entity for Person {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new("Person")
            .field(
                "Id",
                FieldType::scalar(ScalarType::Int64),
                |p: &Person| p.id.into(),
                |p: &mut Person, v| {
                    p.id = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Name",
                FieldType::scalar(ScalarType::String),
                |p: &Person| p.name.clone().into(),
                |p: &mut Person, v| {
                    p.name = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Age",
                FieldType::optional_scalar(ScalarType::Int32),
                |p: &Person| p.age.into(),
                |p: &mut Person, v| {
                    p.age = v.try_into_option()?;
                    Ok(())
                },
            )
            .field(
                "Direction",
                FieldType::enum_type("Direction", ["West", "East"]),
                |p: &Person| p.direction.name().into(),
                |p: &mut Person, v| {
                    let name: String = v.try_into()?;
                    p.direction = Direction::parse(&name)?;
                    Ok(())
                },
            )
            .handler(Arc::new(EnumMapHandler::new([("West", "W"), ("East", "E")])))
            .field(
                "Score",
                FieldType::scalar(ScalarType::Float64),
                |p: &Person| p.score.into(),
                |p: &mut Person, v| {
                    p.score = v.try_into()?;
                    Ok(())
                },
            )
            .identity("Id")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Setting {
    pub name: String,
    pub value: String,
}

impl Setting {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl Entity for Setting {
    fn describe() -> EntityDescriptor<Self> {
        EntityDescriptor::new("Setting")
            .field(
                "Name",
                FieldType::scalar(ScalarType::String),
                |s: &Setting| s.name.clone().into(),
                |s: &mut Setting, v| {
                    s.name = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Value",
                FieldType::scalar(ScalarType::String),
                |s: &Setting| s.value.clone().into(),
                |s: &mut Setting, v| {
                    s.value = v.try_into()?;
                    Ok(())
                },
            )
            .primary("Name")
    }
}

/// Insert the standard five people and return them with their identities.
pub fn seed(engine: &Engine, conn: &SqliteConnection) -> Vec<Person> {
    let mut people = vec![
        Person::new("Ada", Some(36), Direction::West, 9.5),
        Person::new("Brian", None, Direction::East, 7.0),
        Person::new("Cleo", Some(24), Direction::East, 8.25),
        Person::new("Dmitri", Some(51), Direction::West, 6.0),
        Person::new("Alan", Some(41), Direction::West, 9.0),
    ];
    for person in &mut people {
        engine.insert(conn, person).unwrap();
    }
    people
}
