//! Entity declarations.
//!
//! An entity type declares its table, its fields, and a getter/setter pair
//! per field. The metadata resolver turns the declaration into a
//! [`ClassMap`](super::ClassMap); the accessor compiler picks up the
//! getters and setters.

use tablemap_proto::{FieldType, ScalarType, Value};

use crate::handler::PropertyHandlerRef;

/// Reads a field's logical value from an entity.
pub type Getter<E> = fn(&E) -> Value;

/// Writes a field's logical value into an entity.
pub type Setter<E> = fn(&mut E, Value) -> Result<(), tablemap_proto::Error>;

/// A type that maps to a table.
///
/// `Default` supplies the zero-value for columns missing from a row.
///
/// ```
/// use tablemap_core::catalog::{Entity, EntityDescriptor};
/// use tablemap_proto::{FieldType, ScalarType};
///
/// #[derive(Default)]
/// struct Tag {
///     id: i64,
///     label: String,
/// }
///
/// impl Entity for Tag {
///     fn describe() -> EntityDescriptor<Self> {
///         EntityDescriptor::new("Tag")
///             .field("Id", FieldType::scalar(ScalarType::Int64), |t: &Tag| t.id.into(), |t: &mut Tag, v| {
///                 t.id = v.try_into()?;
///                 Ok(())
///             })
///             .field("Label", FieldType::scalar(ScalarType::String), |t: &Tag| t.label.clone().into(), |t: &mut Tag, v| {
///                 t.label = v.try_into()?;
///                 Ok(())
///             })
///             .identity("Id")
///     }
/// }
/// ```
pub trait Entity: Default + Send + Sync + 'static {
    /// Declare the table mapping.
    fn describe() -> EntityDescriptor<Self>;
}

/// One declared field.
pub struct ColumnDef<E> {
    pub(crate) name: String,
    pub(crate) column: Option<String>,
    pub(crate) field_type: FieldType,
    pub(crate) db_type: Option<ScalarType>,
    pub(crate) handler: Option<PropertyHandlerRef>,
    pub(crate) getter: Getter<E>,
    pub(crate) setter: Setter<E>,
}

/// Declaration of an entity's table mapping.
pub struct EntityDescriptor<E> {
    pub(crate) table: String,
    pub(crate) columns: Vec<ColumnDef<E>>,
    pub(crate) primary: Option<String>,
    pub(crate) identity: Option<String>,
}

impl<E> EntityDescriptor<E> {
    /// Start a declaration for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            primary: None,
            identity: None,
        }
    }

    /// Declare a field.
    pub fn field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        getter: Getter<E>,
        setter: Setter<E>,
    ) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            column: None,
            field_type,
            db_type: None,
            handler: None,
            getter,
            setter,
        });
        self
    }

    /// Map the most recently declared field to a differently named column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.column = Some(column.into());
        }
        self
    }

    /// Override the database-side type of the most recently declared field.
    pub fn db_type(mut self, db_type: ScalarType) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.db_type = Some(db_type);
        }
        self
    }

    /// Attach a handler to the most recently declared field.
    pub fn handler(mut self, handler: PropertyHandlerRef) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.handler = Some(handler);
        }
        self
    }

    /// Designate the primary key field.
    pub fn primary(mut self, name: impl Into<String>) -> Self {
        self.primary = Some(name.into());
        self
    }

    /// Designate the database-generated identity field.
    pub fn identity(mut self, name: impl Into<String>) -> Self {
        self.identity = Some(name.into());
        self
    }

    /// Declared table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Find a declared field by name.
    pub(crate) fn column_def(&self, name: &str) -> Option<&ColumnDef<E>> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Sample {
        id: i64,
        name: String,
    }

    fn descriptor() -> EntityDescriptor<Sample> {
        EntityDescriptor::new("Sample")
            .field(
                "Id",
                FieldType::scalar(ScalarType::Int64),
                |s: &Sample| s.id.into(),
                |s: &mut Sample, v| {
                    s.id = v.try_into()?;
                    Ok(())
                },
            )
            .field(
                "Name",
                FieldType::scalar(ScalarType::String),
                |s: &Sample| s.name.clone().into(),
                |s: &mut Sample, v| {
                    s.name = v.try_into()?;
                    Ok(())
                },
            )
            .column("sample_name")
            .primary("Id")
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = descriptor();
        assert_eq!(desc.table(), "Sample");
        assert_eq!(desc.columns.len(), 2);
        assert_eq!(desc.primary.as_deref(), Some("Id"));
        assert_eq!(
            desc.column_def("Name").and_then(|c| c.column.as_deref()),
            Some("sample_name")
        );
        assert!(desc.column_def("Id").unwrap().column.is_none());
    }

    #[test]
    fn test_getter_and_setter() {
        let desc = descriptor();
        let col = desc.column_def("Name").unwrap();

        let mut sample = Sample::default();
        (col.setter)(&mut sample, Value::from("alpha")).unwrap();
        assert_eq!((col.getter)(&sample), Value::from("alpha"));
        assert!((col.setter)(&mut sample, Value::Int32(1)).is_err());
    }
}
