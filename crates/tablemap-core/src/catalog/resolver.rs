//! Metadata resolver.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use super::{ClassMap, Entity, FieldMap};
use crate::error::{Error, Result};
use crate::handler::{HandlerRegistry, PropertyHandlerRef};
use crate::once::OnceMap;

#[derive(Default)]
struct Overrides {
    table: Option<String>,
    columns: HashMap<String, String>,
    primary: Option<String>,
    identity: Option<String>,
    handlers: HashMap<String, PropertyHandlerRef>,
    /// Set once resolution of the type starts; overrides are read-only after.
    frozen: bool,
}

/// Resolves and caches one [`ClassMap`] per entity type.
///
/// Overrides registered with the `map_*` methods apply on top of the
/// entity's own declaration. They must be registered before the type is
/// first resolved, or after [`clear`](MetadataResolver::clear).
pub struct MetadataResolver {
    maps: OnceMap<TypeId, ClassMap>,
    overrides: DashMap<TypeId, Overrides>,
    handlers: Arc<HandlerRegistry>,
}

impl MetadataResolver {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            maps: OnceMap::new(),
            overrides: DashMap::new(),
            handlers,
        }
    }

    /// The handler registry consulted during resolution.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Resolve the class map for `E`, building it on first use.
    ///
    /// Concurrent first calls for the same type build the map once.
    pub fn resolve<E: Entity>(&self) -> Result<Arc<ClassMap>> {
        let type_id = TypeId::of::<E>();
        if let Some(map) = self.maps.get(&type_id) {
            return Ok(map);
        }
        self.handlers.seal();
        self.overrides.entry(type_id).or_default().frozen = true;
        let resolved = self
            .maps
            .get_or_try_init(type_id, || self.build::<E>().map(Arc::new));
        if resolved.is_err() {
            // Nothing was cached; let the mapping be corrected.
            if let Some(mut overrides) = self.overrides.get_mut(&type_id) {
                overrides.frozen = false;
            }
        }
        resolved
    }

    /// True if `E` was already resolved.
    pub fn is_resolved<E: Entity>(&self) -> bool {
        self.maps.contains(&TypeId::of::<E>())
    }

    /// Number of resolved types.
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// True if no type was resolved yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every resolved map. Overrides are kept and accept changes again.
    pub fn clear(&self) {
        self.maps.clear();
        for mut overrides in self.overrides.iter_mut() {
            overrides.frozen = false;
        }
    }

    /// Map `E` to a different table.
    pub fn map_table<E: Entity>(&self, table: impl Into<String>) -> Result<()> {
        let table = table.into();
        self.with_overrides::<E>(None, |o| o.table = Some(table))
    }

    /// Map one field of `E` to a different column.
    pub fn map_column<E: Entity>(&self, field: &str, column: impl Into<String>) -> Result<()> {
        let column = column.into();
        self.with_overrides::<E>(Some(field), |o| {
            o.columns.insert(field.to_string(), column);
        })
    }

    /// Designate the primary key of `E`.
    pub fn map_primary<E: Entity>(&self, field: &str) -> Result<()> {
        self.with_overrides::<E>(Some(field), |o| o.primary = Some(field.to_string()))
    }

    /// Designate the identity field of `E`.
    pub fn map_identity<E: Entity>(&self, field: &str) -> Result<()> {
        self.with_overrides::<E>(Some(field), |o| o.identity = Some(field.to_string()))
    }

    /// Attach a handler to one field of `E`.
    pub fn map_handler<E: Entity>(&self, field: &str, handler: PropertyHandlerRef) -> Result<()> {
        self.with_overrides::<E>(Some(field), |o| {
            o.handlers.insert(field.to_string(), handler);
        })
    }

    fn with_overrides<E: Entity>(
        &self,
        field: Option<&str>,
        apply: impl FnOnce(&mut Overrides),
    ) -> Result<()> {
        if let Some(field) = field {
            if E::describe().column_def(field).is_none() {
                return Err(Error::Mapping(format!(
                    "{} has no field '{field}'",
                    type_name::<E>()
                )));
            }
        }
        // The entry stays locked from the check through the write.
        let mut overrides = self.overrides.entry(TypeId::of::<E>()).or_default();
        if overrides.frozen {
            warn!(entity = type_name::<E>(), "mapping override after resolution");
            return Err(Error::Configuration(format!(
                "cannot override the mapping of {}: it was already resolved",
                type_name::<E>()
            )));
        }
        apply(&mut *overrides);
        Ok(())
    }

    fn build<E: Entity>(&self) -> Result<ClassMap> {
        let descriptor = E::describe();
        let overrides = self.overrides.get(&TypeId::of::<E>());
        let overrides = overrides.as_deref();

        let table = overrides
            .and_then(|o| o.table.clone())
            .unwrap_or_else(|| descriptor.table.clone());

        let mut fields = Vec::with_capacity(descriptor.columns.len());
        for def in &descriptor.columns {
            let mut field = FieldMap::new(def.name.clone(), def.field_type.clone());

            if let Some(column) = overrides
                .and_then(|o| o.columns.get(&def.name).cloned())
                .or_else(|| def.column.clone())
            {
                field = field.with_column(column);
            }
            if let Some(db_type) = def.db_type {
                field = field.with_db_type(db_type);
            }

            let handler = overrides
                .and_then(|o| o.handlers.get(&def.name).cloned())
                .or_else(|| def.handler.clone())
                .or_else(|| self.handlers.get_global(&def.field_type.logical()));
            if let Some(handler) = handler {
                field = field.with_handler(handler);
            }

            fields.push(field);
        }

        let mut map = ClassMap::new(table, fields)?.with_entity_name(type_name::<E>());

        let primary = overrides
            .and_then(|o| o.primary.clone())
            .or_else(|| descriptor.primary.clone());
        let identity = overrides
            .and_then(|o| o.identity.clone())
            .or_else(|| descriptor.identity.clone());

        match primary {
            Some(name) => map = map.with_primary(&name)?,
            None if identity.is_none() => {
                if let Some(name) = implicit_primary(&map) {
                    map = map.with_primary(&name)?;
                }
            }
            None => {}
        }
        if let Some(name) = identity {
            map = map.with_identity(&name)?;
        }

        debug!(
            entity = map.entity_name(),
            table = map.table(),
            fields = map.fields().len(),
            primary = map.primary().map(FieldMap::name),
            identity = map.identity().map(FieldMap::name),
            "resolved class map"
        );
        Ok(map)
    }
}

/// A single field named `id` (any case) is the primary key when none is declared.
fn implicit_primary(map: &ClassMap) -> Option<String> {
    let mut candidates = map
        .fields()
        .iter()
        .filter(|f| f.name().eq_ignore_ascii_case("id"));
    match (candidates.next(), candidates.next()) {
        (Some(field), None) => Some(field.name().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityDescriptor;
    use crate::handler::EnumMapHandler;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use tablemap_proto::{FieldType, ScalarType, Value};

    #[derive(Default)]
    struct Person {
        id: i64,
        name: String,
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
        }
    }

    #[derive(Default)]
    struct Empty;

    impl Entity for Empty {
        fn describe() -> EntityDescriptor<Self> {
            EntityDescriptor::new("Empty")
        }
    }

    static DESCRIBE_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counted {
        value: i32,
    }

    impl Entity for Counted {
        fn describe() -> EntityDescriptor<Self> {
            DESCRIBE_CALLS.fetch_add(1, Ordering::SeqCst);
            EntityDescriptor::new("Counted").field(
                "Value",
                FieldType::scalar(ScalarType::Int32),
                |c: &Counted| c.value.into(),
                |c: &mut Counted, v| {
                    c.value = v.try_into()?;
                    Ok(())
                },
            )
        }
    }

    fn resolver() -> MetadataResolver {
        MetadataResolver::new(Arc::new(HandlerRegistry::new()))
    }

    #[test]
    fn test_resolve_caches_map() {
        let resolver = resolver();
        let a = resolver.resolve::<Person>().unwrap();
        let b = resolver.resolve::<Person>().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.table(), "Person");
        assert!(a.entity_name().ends_with("Person"));
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn test_implicit_primary_key() {
        let map = resolver().resolve::<Person>().unwrap();
        assert_eq!(map.primary().map(FieldMap::name), Some("Id"));
        assert!(map.identity().is_none());
    }

    #[test]
    fn test_no_fields_is_mapping_error() {
        let resolver = resolver();
        let err = resolver.resolve::<Empty>().unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
        // A failed resolution caches nothing and keeps overrides open.
        assert!(!resolver.is_resolved::<Empty>());
        resolver.map_table::<Empty>("empty").unwrap();
    }

    #[test]
    fn test_overrides_apply() {
        let resolver = resolver();
        resolver.map_table::<Person>("people").unwrap();
        resolver.map_column::<Person>("Name", "full_name").unwrap();
        resolver.map_identity::<Person>("Id").unwrap();
        resolver
            .map_handler::<Person>("Name", Arc::new(EnumMapHandler::new([("a", "b")])))
            .unwrap();

        let map = resolver.resolve::<Person>().unwrap();
        assert_eq!(map.table(), "people");
        assert_eq!(map.field("Name").unwrap().column(), "full_name");
        assert!(map.field("Name").unwrap().handler().is_some());
        assert_eq!(map.identity().map(FieldMap::name), Some("Id"));
        // An identity suppresses the implicit primary key.
        assert!(map.primary().is_none());
    }

    #[test]
    fn test_override_unknown_field() {
        let err = resolver().map_column::<Person>("Nope", "x").unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }

    #[test]
    fn test_override_after_resolve_fails() {
        let resolver = resolver();
        resolver.resolve::<Person>().unwrap();

        let err = resolver.map_table::<Person>("people").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_override_after_clear() {
        let resolver = resolver();
        resolver.resolve::<Person>().unwrap();
        resolver.clear();

        resolver.map_table::<Person>("people").unwrap();
        assert_eq!(resolver.resolve::<Person>().unwrap().table(), "people");
    }

    #[test]
    fn test_override_racing_resolve_is_never_lost() {
        for _ in 0..20 {
            let resolver = resolver();
            let barrier = Barrier::new(2);

            let last_applied = std::thread::scope(|s| {
                let overrides = s.spawn(|| {
                    barrier.wait();
                    let mut last = None;
                    for i in 0.. {
                        if resolver.map_table::<Person>(format!("people_{i}")).is_err() {
                            break;
                        }
                        last = Some(format!("people_{i}"));
                    }
                    last
                });
                barrier.wait();
                resolver.resolve::<Person>().unwrap();
                overrides.join().unwrap()
            });

            // Every accepted override is part of the resolved map.
            let map = resolver.resolve::<Person>().unwrap();
            assert_eq!(map.table(), last_applied.as_deref().unwrap_or("Person"));
        }
    }

    #[test]
    fn test_resolve_seals_registry() {
        let resolver = resolver();
        assert!(!resolver.handlers().is_sealed());
        resolver.resolve::<Person>().unwrap();
        assert!(resolver.handlers().is_sealed());
    }

    #[test]
    fn test_global_handler_is_baked_into_field() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_global(
                tablemap_proto::LogicalType::Scalar(ScalarType::String),
                Arc::new(crate::handler::FnHandler::new("upper", Ok, Ok)),
            )
            .unwrap();
        let resolver = MetadataResolver::new(registry);

        let map = resolver.resolve::<Person>().unwrap();
        let handler = map.field("Name").unwrap().handler().unwrap();
        assert_eq!(handler.to_db("x".into()).unwrap(), Value::from("x"));
        assert!(map.field("Id").unwrap().handler().is_none());
    }

    #[test]
    fn test_concurrent_resolve_builds_once() {
        let resolver = resolver();
        let barrier = Barrier::new(100);
        let before = DESCRIBE_CALLS.load(Ordering::SeqCst);

        std::thread::scope(|s| {
            for _ in 0..100 {
                s.spawn(|| {
                    barrier.wait();
                    resolver.resolve::<Counted>().unwrap();
                });
            }
        });

        assert_eq!(DESCRIBE_CALLS.load(Ordering::SeqCst) - before, 1);
    }
}
