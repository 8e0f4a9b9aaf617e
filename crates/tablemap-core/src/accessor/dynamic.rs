//! Schema-less row materialization.

use tablemap_proto::Value;
use tracing::debug;

use super::{convert, AccessorKey};
use crate::catalog::{ClassMap, FieldMap};
use crate::error::Result;
use crate::row::Row;

/// Converts result rows into ordered column/value maps.
///
/// Mapped columns go through the same handlers and conversion policy as a
/// [`CompiledAccessor`](super::CompiledAccessor); columns the class map does
/// not know are passed through as the driver returned them.
#[derive(Debug)]
pub struct DynamicAccessor {
    key: AccessorKey,
    fields: Vec<FieldMap>,
}

impl DynamicAccessor {
    pub fn compile(key: AccessorKey, map: &ClassMap) -> Self {
        debug!(table = map.table(), fields = map.fields().len(), "compiled dynamic accessor");
        Self {
            key,
            fields: map.fields().to_vec(),
        }
    }

    pub fn key(&self) -> AccessorKey {
        self.key
    }

    /// Convert one row, keeping the row's column order.
    pub fn from_row(&self, row: &Row) -> Result<Row> {
        let mut out = Row::with_capacity(row.len());
        for (column, raw) in row.iter() {
            let value = match self.field(column) {
                Some(field) => convert::from_db(field, raw.clone())?,
                None => raw.clone(),
            };
            out.push(self.column_name(column), value);
        }
        Ok(out)
    }

    fn field(&self, column: &str) -> Option<&FieldMap> {
        self.fields
            .iter()
            .find(|f| f.column().eq_ignore_ascii_case(column))
    }

    /// Mapped columns are reported under their declared spelling.
    fn column_name(&self, column: &str) -> String {
        self.field(column)
            .map(|f| f.column().to_string())
            .unwrap_or_else(|| column.to_string())
    }
}

static NULL: Value = Value::Null;

/// Value of one column, null when the row lacks it.
pub fn column_value<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}
