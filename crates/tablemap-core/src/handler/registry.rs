//! Global handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use tablemap_proto::LogicalType;

use super::{IdentityHandler, PropertyHandlerRef};
use crate::catalog::FieldMap;
use crate::error::{Error, Result};

/// Maps logical types to handlers.
///
/// Registration is a configuration-time action. The registry is sealed the
/// first time the metadata resolver builds a class map against it; later
/// registrations fail with [`Error::Configuration`] because cached class
/// maps and accessors would not observe them.
pub struct HandlerRegistry {
    globals: RwLock<Globals>,
    identity: PropertyHandlerRef,
}

/// Handlers and the seal flag, guarded by one lock.
#[derive(Default)]
struct Globals {
    handlers: HashMap<LogicalType, PropertyHandlerRef>,
    sealed: bool,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            globals: RwLock::new(Globals::default()),
            identity: Arc::new(IdentityHandler),
        }
    }

    /// Register a handler for every field of `logical` type.
    pub fn register_global(&self, logical: LogicalType, handler: PropertyHandlerRef) -> Result<()> {
        let mut globals = self.globals.write();
        if globals.sealed {
            warn!(?logical, "handler registered after first class-map resolution");
            return Err(Error::Configuration(format!(
                "cannot register a handler for {logical:?}: class maps were already resolved"
            )));
        }
        debug!(?logical, ?handler, "registered global property handler");
        globals.handlers.insert(logical, handler);
        Ok(())
    }

    /// The global handler for a logical type, if any.
    pub fn get_global(&self, logical: &LogicalType) -> Option<PropertyHandlerRef> {
        self.globals.read().handlers.get(logical).cloned()
    }

    /// The effective handler for a field: its own, then global, then identity.
    pub fn get_for_field(&self, field: &FieldMap) -> PropertyHandlerRef {
        self.resolve_for_field(field)
            .unwrap_or_else(|| Arc::clone(&self.identity))
    }

    /// Like [`get_for_field`](Self::get_for_field) but `None` instead of identity.
    pub fn resolve_for_field(&self, field: &FieldMap) -> Option<PropertyHandlerRef> {
        field
            .handler()
            .cloned()
            .or_else(|| self.get_global(&field.field_type().logical()))
    }

    /// Stop accepting registrations.
    pub fn seal(&self) {
        if !self.is_sealed() {
            self.globals.write().sealed = true;
        }
    }

    /// True once the registry stopped accepting registrations.
    pub fn is_sealed(&self) -> bool {
        self.globals.read().sealed
    }

    /// Number of global handlers.
    pub fn len(&self) -> usize {
        self.globals.read().handlers.len()
    }

    /// True if no global handler is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldMap;
    use crate::handler::{EnumMapHandler, PropertyHandler};
    use tablemap_proto::{FieldType, ScalarType, Value};

    fn direction_type() -> FieldType {
        FieldType::enum_type("Direction", ["West", "East"])
    }

    #[test]
    fn test_falls_back_to_identity() {
        let registry = HandlerRegistry::new();
        let field = FieldMap::new("Name", FieldType::scalar(ScalarType::String));

        assert!(registry.resolve_for_field(&field).is_none());
        let handler = registry.get_for_field(&field);
        assert_eq!(handler.to_db("x".into()).unwrap(), Value::from("x"));
    }

    #[test]
    fn test_global_handler_applies_by_logical_type() {
        let registry = HandlerRegistry::new();
        registry
            .register_global(
                direction_type().logical(),
                Arc::new(EnumMapHandler::new([("West", "W"), ("East", "E")])),
            )
            .unwrap();

        let field = FieldMap::new("Direction", direction_type());
        let handler = registry.get_for_field(&field);
        assert_eq!(handler.to_db("East".into()).unwrap(), Value::from("E"));
    }

    #[test]
    fn test_field_handler_wins_over_global() {
        let registry = HandlerRegistry::new();
        registry
            .register_global(
                direction_type().logical(),
                Arc::new(EnumMapHandler::new([("West", "W")])),
            )
            .unwrap();

        let field = FieldMap::new("Direction", direction_type())
            .with_handler(Arc::new(EnumMapHandler::new([("West", "west")])));
        let handler = registry.get_for_field(&field);
        assert_eq!(handler.to_db("West".into()).unwrap(), Value::from("west"));
    }

    #[test]
    fn test_registration_after_seal_fails() {
        let registry = HandlerRegistry::new();
        registry.seal();

        let err = registry
            .register_global(
                LogicalType::Scalar(ScalarType::Bool),
                Arc::new(crate::handler::IdentityHandler),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_racing_seal() {
        for _ in 0..20 {
            let registry = HandlerRegistry::new();
            let barrier = std::sync::Barrier::new(2);

            std::thread::scope(|s| {
                let registrations = s.spawn(|| {
                    barrier.wait();
                    let mut accepted = 0;
                    for i in 0.. {
                        let logical = LogicalType::Enum(format!("E{i}"));
                        if registry
                            .register_global(logical, Arc::new(crate::handler::IdentityHandler))
                            .is_err()
                        {
                            break;
                        }
                        accepted += 1;
                    }
                    accepted
                });
                barrier.wait();
                registry.seal();
                // Nothing lands once the seal is visible.
                let at_seal = registry.len();
                let accepted = registrations.join().unwrap();
                assert_eq!(registry.len(), at_seal);
                assert_eq!(accepted, at_seal);
            });
        }
    }
}
