//! tablemap value and expression types.
//!
//! This crate defines the types shared by every layer of tablemap: runtime
//! values, declared field types, and the query expression model that the
//! statement builder lowers into SQL.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for parameters and result rows
//! - [`types`] - Declared field types and handler keys
//! - [`query`] - Fields, operators, predicates and groups
//! - [`fingerprint`] - Value-independent shape fingerprints
//! - [`error`] - Expression validation errors
//!
//! # Example
//!
//! ```
//! use tablemap_proto::{QueryField, QueryGroup};
//!
//! let filter = QueryGroup::or([
//!     QueryField::eq("Name", "Alice").unwrap(),
//!     QueryField::between("Age", 18, 65).unwrap(),
//! ]);
//! assert_eq!(filter.flatten().count(), 2);
//! ```

pub mod error;
pub mod fingerprint;
pub mod query;
pub mod types;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use fingerprint::QueryFingerprint;
pub use query::{
    Arity, Conjunction, Field, Flatten, Operand, Operator, OrderDirection, OrderField,
    QueryField, QueryGroup, QueryNode,
};
pub use types::{FieldType, LogicalType, ScalarType};
pub use value::Value;
