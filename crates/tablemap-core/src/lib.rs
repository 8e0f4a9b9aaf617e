//! tablemap core - metadata resolution, compiled accessors, SQL statement
//! building and caching.
//!
//! This crate maps plain Rust types to relational tables and turns query
//! expressions into parameterized, dialect-specific SQL. Database I/O is
//! left to a caller-supplied [`Connection`].
//!
//! # Modules
//!
//! - [`catalog`] - Entity declarations and the metadata resolver
//! - [`handler`] - Property handlers and the global handler registry
//! - [`accessor`] - Compiled entity/parameter/row accessors
//! - [`statement`] - Dialects and the statement builder
//! - [`cache`] - Result cache and command-text cache
//! - [`executor`] - The [`Engine`] orchestrator
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tablemap_core::catalog::{Entity, EntityDescriptor};
//! use tablemap_core::statement::{SelectOptions, Sqlite};
//! use tablemap_core::Engine;
//! use tablemap_proto::{FieldType, QueryField, QueryGroup, ScalarType};
//!
//! #[derive(Default)]
//! struct Person {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Entity for Person {
//!     fn describe() -> EntityDescriptor<Self> {
//!         EntityDescriptor::new("Person")
//!             .field("Id", FieldType::scalar(ScalarType::Int64),
//!                 |p: &Person| p.id.into(),
//!                 |p: &mut Person, v| { p.id = v.try_into()?; Ok(()) })
//!             .field("Name", FieldType::scalar(ScalarType::String),
//!                 |p: &Person| p.name.clone().into(),
//!                 |p: &mut Person, v| { p.name = v.try_into()?; Ok(()) })
//!             .identity("Id")
//!     }
//! }
//!
//! let engine = Engine::new(Arc::new(Sqlite));
//! let map = engine.resolver().resolve::<Person>().unwrap();
//! let filter = QueryGroup::from(QueryField::eq("Name", "Ada").unwrap());
//! let statement = engine
//!     .statements()
//!     .select(&map, Some(&filter), &SelectOptions::new())
//!     .unwrap();
//! assert_eq!(
//!     statement.sql,
//!     r#"SELECT "Id", "Name" FROM "Person" WHERE "Name" = @Name"#
//! );
//! ```

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod accessor;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
mod once;
pub mod row;
pub mod statement;

pub use accessor::{AccessorCache, AccessorKey, CompiledAccessor, Direction, DynamicAccessor};
pub use cache::{CacheStats, CommandCache, ResultCache};
pub use catalog::{ClassMap, Entity, EntityDescriptor, FieldMap, MetadataResolver};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use executor::{Connection, Engine, MultiQuery, MultiResult};
pub use handler::{HandlerRegistry, PropertyHandler, PropertyHandlerRef};
pub use row::Row;
pub use statement::{Aggregate, Dialect, SelectOptions, Statement, StatementBuilder, StatementKind};

/// Re-export value and expression types.
pub use tablemap_proto as proto;
