//! Entity metadata.
//!
//! Entities declare their table mapping through [`Entity::describe`]. The
//! [`MetadataResolver`] turns a declaration, plus any registered overrides,
//! into an immutable [`ClassMap`] that is built once per type and shared.

mod class_map;
mod entity;
mod field;
mod resolver;

pub use class_map::ClassMap;
pub use entity::{ColumnDef, Entity, EntityDescriptor, Getter, Setter};
pub use field::FieldMap;
pub use resolver::MetadataResolver;
