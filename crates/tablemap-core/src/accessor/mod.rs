//! Compiled accessors.
//!
//! An accessor converts between one entity type and the ordered parameter
//! values or result rows of a statement. Accessors are compiled once per
//! [`AccessorKey`] and cached in an [`AccessorCache`].

mod compiled;
pub mod convert;
mod dynamic;

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use tracing::trace;

pub use compiled::{AccessorKey, CompiledAccessor, Direction};
pub use dynamic::{column_value, DynamicAccessor};

use crate::catalog::{ClassMap, Entity, FieldMap};
use crate::error::{Error, Result};
use crate::once::OnceMap;

type AnyAccessor = dyn Any + Send + Sync;

/// Build-once cache of compiled accessors.
///
/// For a given key the builder runs at most once, even under concurrent
/// first access; every caller receives the same instance.
pub struct AccessorCache {
    accessors: OnceMap<AccessorKey, AnyAccessor>,
}

impl Default for AccessorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessorCache {
    pub fn new() -> Self {
        Self {
            accessors: OnceMap::new(),
        }
    }

    /// Return the accessor cached under `key`, building it on first use.
    pub fn get_or_build<T, F>(&self, key: AccessorKey, build: F) -> Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T>,
    {
        let value = self.accessors.get_or_try_init(key, || {
            trace!(?key, "accessor cache miss");
            build().map(|accessor| Arc::new(accessor) as Arc<AnyAccessor>)
        })?;
        value.downcast::<T>().map_err(|_| {
            Error::Configuration(format!(
                "accessor cached under {key:?} is not a {}",
                type_name::<T>()
            ))
        })
    }

    /// Entity-to-parameters accessor over `fields`, in the given order.
    pub fn writer<E: Entity>(
        &self,
        fields: &[&FieldMap],
    ) -> Result<Arc<CompiledAccessor<E>>> {
        let key = AccessorKey::of::<E>(Direction::ToParams, fields);
        self.get_or_build(key, || CompiledAccessor::compile(key, fields))
    }

    /// Row-to-entity accessor over every mapped field.
    pub fn reader<E: Entity>(&self, map: &ClassMap) -> Result<Arc<CompiledAccessor<E>>> {
        let fields: Vec<&FieldMap> = map.fields().iter().collect();
        let key = AccessorKey::of::<E>(Direction::FromRow, &fields);
        self.get_or_build(key, || CompiledAccessor::compile(key, &fields))
    }

    /// Row-to-[`Row`](crate::Row) accessor for the table of `E`.
    pub fn dynamic<E: Entity>(&self, map: &ClassMap) -> Result<Arc<DynamicAccessor>> {
        let fields: Vec<&FieldMap> = map.fields().iter().collect();
        let key = AccessorKey::new(TypeId::of::<E>(), Direction::FromRowDynamic, &fields);
        self.get_or_build(key, || Ok(DynamicAccessor::compile(key, map)))
    }

    /// Number of compiled accessors.
    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    /// True if nothing was compiled yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every accessor.
    pub fn clear(&self) {
        self.accessors.clear();
    }
}
