//! Resolved table metadata.

use std::collections::HashSet;

use crate::error::{Error, Result};

use super::FieldMap;

/// How an entity type maps to a table.
///
/// Built once per type by the [`MetadataResolver`](super::MetadataResolver)
/// and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct ClassMap {
    entity: String,
    table: String,
    fields: Vec<FieldMap>,
    primary: Option<usize>,
    identity: Option<usize>,
}

impl ClassMap {
    /// Create a class map, rejecting empty or duplicated field lists.
    pub fn new(table: impl Into<String>, fields: Vec<FieldMap>) -> Result<Self> {
        let table = table.into();
        if table.trim().is_empty() {
            return Err(Error::Mapping("table name is empty".into()));
        }
        if fields.is_empty() {
            return Err(Error::Mapping(format!("table '{table}' declares no fields")));
        }

        let mut names = HashSet::new();
        let mut columns = HashSet::new();
        for field in &fields {
            if !names.insert(field.name()) {
                return Err(Error::Mapping(format!(
                    "field '{}' is declared twice on '{table}'",
                    field.name()
                )));
            }
            if !columns.insert(field.column().to_ascii_lowercase()) {
                return Err(Error::Mapping(format!(
                    "column '{}' is mapped twice on '{table}'",
                    field.column()
                )));
            }
        }

        Ok(Self {
            entity: table.clone(),
            table,
            fields,
            primary: None,
            identity: None,
        })
    }

    /// Record the Rust type name this map was resolved from.
    pub fn with_entity_name(mut self, entity: impl Into<String>) -> Self {
        self.entity = entity.into();
        self
    }

    /// Designate the primary key field.
    pub fn with_primary(mut self, name: &str) -> Result<Self> {
        self.primary = Some(self.position(name)?);
        Ok(self)
    }

    /// Designate the database-generated identity field.
    pub fn with_identity(mut self, name: &str) -> Result<Self> {
        self.identity = Some(self.position(name)?);
        Ok(self)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name() == name)
            .ok_or_else(|| {
                Error::Mapping(format!("table '{}' has no field '{name}'", self.table))
            })
    }

    /// Name of the entity type.
    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldMap] {
        &self.fields
    }

    /// Look up a field by its entity name.
    pub fn field(&self, name: &str) -> Option<&FieldMap> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Look up a field by its entity name, failing with a mapping error.
    pub fn require_field(&self, name: &str) -> Result<&FieldMap> {
        self.field(name).ok_or_else(|| {
            Error::Mapping(format!("table '{}' has no field '{name}'", self.table))
        })
    }

    /// Look up a field by column name, ignoring ASCII case.
    pub fn field_by_column(&self, column: &str) -> Option<&FieldMap> {
        self.fields
            .iter()
            .find(|f| f.column().eq_ignore_ascii_case(column))
    }

    /// The primary key field.
    pub fn primary(&self) -> Option<&FieldMap> {
        self.primary.map(|idx| &self.fields[idx])
    }

    /// The identity field.
    pub fn identity(&self) -> Option<&FieldMap> {
        self.identity.map(|idx| &self.fields[idx])
    }

    /// The field that identifies a row: primary key, else identity.
    pub fn key(&self) -> Option<&FieldMap> {
        self.primary().or_else(|| self.identity())
    }

    /// Like [`key`](Self::key), but an error naming the operation if absent.
    pub fn require_key(&self, operation: &str) -> Result<&FieldMap> {
        self.key().ok_or_else(|| {
            Error::Mapping(format!(
                "{operation} requires a primary key or identity field on '{}'",
                self.table
            ))
        })
    }

    /// True if `name` is the identity field.
    pub fn is_identity(&self, name: &str) -> bool {
        self.identity().is_some_and(|f| f.name() == name)
    }

    /// True if `name` is the key field.
    pub fn is_key(&self, name: &str) -> bool {
        self.key().is_some_and(|f| f.name() == name)
    }

    /// Fields written by an insert: everything except the identity.
    pub fn insert_fields(&self) -> impl Iterator<Item = &FieldMap> {
        self.fields.iter().filter(|f| !self.is_identity(f.name()))
    }

    /// Fields written by an update: everything except key and identity.
    pub fn update_fields(&self) -> impl Iterator<Item = &FieldMap> {
        self.fields
            .iter()
            .filter(|f| !self.is_identity(f.name()) && !self.is_key(f.name()))
    }
}
