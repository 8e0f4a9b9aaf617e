//! Resolved field mappings.

use std::fmt;

use tablemap_proto::{Field, FieldType, ScalarType};

use crate::handler::PropertyHandlerRef;

/// How one entity field maps to a column.
#[derive(Clone)]
pub struct FieldMap {
    name: String,
    column: String,
    field_type: FieldType,
    db_type: ScalarType,
    handler: Option<PropertyHandlerRef>,
}

impl FieldMap {
    /// Create a mapping whose column has the same name as the field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let db_type = default_db_type(&field_type);
        Self {
            column: name.clone(),
            name,
            field_type,
            db_type,
            handler: None,
        }
    }

    /// Map to a differently named column.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Override the database-side type.
    pub fn with_db_type(mut self, db_type: ScalarType) -> Self {
        self.db_type = db_type;
        self
    }

    /// Attach a field-specific handler.
    pub fn with_handler(mut self, handler: PropertyHandlerRef) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Field name on the entity.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column name in the table.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Declared logical type.
    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Database-side type that raw driver values are normalized to.
    pub fn db_type(&self) -> ScalarType {
        self.db_type
    }

    /// Field-specific handler, if one was attached.
    pub fn handler(&self) -> Option<&PropertyHandlerRef> {
        self.handler.as_ref()
    }

    /// True if the field accepts nulls.
    pub fn is_nullable(&self) -> bool {
        self.field_type.is_nullable()
    }

    /// The field as an expression reference.
    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.field_type.clone())
    }
}

impl fmt::Debug for FieldMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMap")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("field_type", &self.field_type)
            .field("db_type", &self.db_type)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Enums are stored by variant name unless a handler or override says otherwise.
fn default_db_type(field_type: &FieldType) -> ScalarType {
    field_type.scalar_type().unwrap_or(ScalarType::String)
}
