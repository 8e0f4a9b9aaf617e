//! Compiled entity accessors.

use std::any::{type_name, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;

use tablemap_proto::Value;

use super::convert;
use crate::catalog::{Entity, FieldMap, Getter, Setter};
use crate::error::{Error, Result};
use crate::row::Row;

/// Which way an accessor converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Entity to ordered parameter values.
    ToParams,
    /// Row to entity.
    FromRow,
    /// Row to a converted [`Row`].
    FromRowDynamic,
}

/// Cache key of a compiled accessor.
///
/// Two keys are equal only for the same entity type, the same direction,
/// and the same ordered field set with the same column names, database
/// types and handler instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessorKey {
    entity: TypeId,
    direction: Direction,
    field_set: u64,
}

impl AccessorKey {
    pub fn new(entity: TypeId, direction: Direction, fields: &[&FieldMap]) -> Self {
        let mut hasher = DefaultHasher::new();
        fields.len().hash(&mut hasher);
        for field in fields {
            field.name().hash(&mut hasher);
            field.column().hash(&mut hasher);
            field.db_type().hash(&mut hasher);
            // Handler instance by address; the cached accessor keeps it alive,
            // so the address is not reused while the key is.
            field
                .handler()
                .map(|handler| Arc::as_ptr(handler).cast::<()>() as usize)
                .hash(&mut hasher);
        }
        Self {
            entity,
            direction,
            field_set: hasher.finish(),
        }
    }

    /// Key for an entity type `E`.
    pub fn of<E: 'static>(direction: Direction, fields: &[&FieldMap]) -> Self {
        Self::new(TypeId::of::<E>(), direction, fields)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Hash of the participating field set.
    pub fn field_set(&self) -> u64 {
        self.field_set
    }
}

struct Slot<E> {
    field: FieldMap,
    getter: Getter<E>,
    setter: Setter<E>,
}

/// Converts between entities of type `E` and parameters or rows.
///
/// Built once per [`AccessorKey`] and shared. Holds no mutable state, so
/// one instance serves any number of threads.
pub struct CompiledAccessor<E> {
    key: AccessorKey,
    slots: Vec<Slot<E>>,
}

impl<E: Entity> CompiledAccessor<E> {
    /// Bind `fields` to the getters and setters `E` declares.
    pub fn compile(key: AccessorKey, fields: &[&FieldMap]) -> Result<Self> {
        let descriptor = E::describe();
        let slots = fields
            .iter()
            .map(|field| {
                let def = descriptor.column_def(field.name()).ok_or_else(|| {
                    Error::Mapping(format!(
                        "{} declares no field '{}'",
                        type_name::<E>(),
                        field.name()
                    ))
                })?;
                Ok(Slot {
                    field: (*field).clone(),
                    getter: def.getter,
                    setter: def.setter,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            entity = type_name::<E>(),
            direction = ?key.direction,
            fields = slots.len(),
            "compiled accessor"
        );
        Ok(Self { key, slots })
    }

    pub fn key(&self) -> AccessorKey {
        self.key
    }

    /// Participating fields, in parameter order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldMap> {
        self.slots.iter().map(|slot| &slot.field)
    }

    /// Extract database-ready parameter values, one per field.
    pub fn to_params(&self, entity: &E) -> Result<Vec<Value>> {
        self.slots
            .iter()
            .map(|slot| convert::to_db(&slot.field, (slot.getter)(entity)))
            .collect()
    }

    /// Materialize an entity, reading columns by name.
    ///
    /// Columns absent from the row leave the field at its `Default` value.
    pub fn from_row(&self, row: &Row) -> Result<E> {
        let mut entity = E::default();
        for slot in &self.slots {
            if let Some(raw) = row.get(slot.field.column()) {
                Self::assign(slot, &mut entity, raw.clone())?;
            }
        }
        Ok(entity)
    }

    /// Database-ready value of one field.
    pub fn read(&self, entity: &E, field: &str) -> Option<Result<Value>> {
        self.slot(field)
            .map(|slot| convert::to_db(&slot.field, (slot.getter)(entity)))
    }

    /// Assign a raw database value to one field, converting it first.
    pub fn write(&self, entity: &mut E, field: &str, raw: Value) -> Result<()> {
        let slot = self.slot(field).ok_or_else(|| {
            Error::Mapping(format!("accessor does not cover field '{field}'"))
        })?;
        Self::assign(slot, entity, raw)
    }

    fn slot(&self, field: &str) -> Option<&Slot<E>> {
        self.slots.iter().find(|slot| slot.field.name() == field)
    }

    fn assign(slot: &Slot<E>, entity: &mut E, raw: Value) -> Result<()> {
        let value = convert::from_db(&slot.field, raw)?;
        (slot.setter)(entity, value.clone())
            .map_err(|e| Error::conversion(slot.field.name(), value, e.to_string()))
    }
}

impl<E> fmt::Debug for CompiledAccessor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledAccessor")
            .field("key", &self.key)
            .field("fields", &self.slots.len())
            .finish()
    }
}
