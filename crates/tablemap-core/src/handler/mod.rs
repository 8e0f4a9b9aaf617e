//! Property handlers.
//!
//! A property handler converts a field's logical value to its database
//! representation and back. Handlers are registered globally per logical
//! type on the [`HandlerRegistry`], or attached to a single field through the
//! metadata resolver. Lookup order for a field is: its own handler, then the
//! global handler for its logical type, then [`IdentityHandler`].

mod builtin;
mod registry;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use tablemap_proto::Value;

pub use builtin::{EnumMapHandler, EnumOrdinalHandler, FnHandler, IdentityHandler};
pub use registry::HandlerRegistry;

/// Failure reported by a handler. The caller attaches field and value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A pure, bidirectional value conversion.
///
/// Implementations must be side-effect free. Both directions receive
/// `Value::Null` for null values and may return it.
pub trait PropertyHandler: Send + Sync + fmt::Debug {
    /// Logical value to database value.
    fn to_db(&self, value: Value) -> Result<Value, HandlerError>;

    /// Database value to logical value.
    fn from_db(&self, value: Value) -> Result<Value, HandlerError>;
}

/// Shared handler reference stored in field mappings and the registry.
pub type PropertyHandlerRef = Arc<dyn PropertyHandler>;
