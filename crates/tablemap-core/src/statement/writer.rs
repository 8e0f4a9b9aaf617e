//! SQL text and parameter accumulation.

use std::collections::{HashMap, HashSet};

use tablemap_proto::Value;

use super::dialect::{Dialect, PlaceholderStyle};
use super::Parameter;

/// Builds SQL text and its parameter list side by side.
///
/// Parameter names are unique within one writer. A requested base name
/// that is already taken gets a `_1`, `_2`, ... suffix. Placeholders are
/// written in the dialect's style as parameters are bound, so text order
/// and parameter order never drift apart.
pub(crate) struct SqlWriter<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    parameters: Vec<Parameter>,
    names: HashSet<String>,
    numbers: HashMap<String, usize>,
    prefix: String,
}

impl<'d> SqlWriter<'d> {
    pub(crate) fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            parameters: Vec::new(),
            names: HashSet::new(),
            numbers: HashMap::new(),
            prefix: String::new(),
        }
    }

    /// Prefix prepended to every name bound from now on.
    pub(crate) fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub(crate) fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    pub(crate) fn push_identifier(&mut self, ident: &str) {
        let quoted = self.dialect.quote_identifier(ident);
        self.sql.push_str(&quoted);
    }

    /// `alias.ident`, with only the identifier quoted.
    pub(crate) fn push_qualified(&mut self, alias: &str, ident: &str) {
        self.sql.push_str(alias);
        self.sql.push('.');
        self.push_identifier(ident);
    }

    pub(crate) fn push_comma(&mut self) {
        self.sql.push_str(", ");
    }

    /// Write `items` separated by `separator`.
    pub(crate) fn push_list<I, T, F>(&mut self, items: I, separator: &str, mut f: F)
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&mut Self, T),
    {
        let mut first = true;
        for item in items {
            if !first {
                self.sql.push_str(separator);
            }
            f(self, item);
            first = false;
        }
    }

    /// Bind a new parameter and write its placeholder. Returns the name used.
    pub(crate) fn bind(&mut self, base: &str, value: Value) -> String {
        let name = self.allocate(base);
        self.parameters.push(Parameter {
            name: name.clone(),
            value,
        });
        match self.dialect.placeholder_style() {
            PlaceholderStyle::Named(prefix) => {
                self.sql.push(prefix);
                self.sql.push_str(&name);
            }
            PlaceholderStyle::Numbered => {
                let number = self.parameters.len();
                self.numbers.insert(name.clone(), number);
                self.sql.push('$');
                self.sql.push_str(&number.to_string());
            }
            PlaceholderStyle::Positional => self.sql.push('?'),
        }
        name
    }

    /// Write a placeholder for a parameter bound earlier under `name`.
    ///
    /// Named and numbered styles refer back to the same parameter; the
    /// positional style has to bind the value again.
    pub(crate) fn rebind(&mut self, name: &str) {
        match self.dialect.placeholder_style() {
            PlaceholderStyle::Named(prefix) => {
                self.sql.push(prefix);
                self.sql.push_str(name);
            }
            PlaceholderStyle::Numbered => {
                let number = self.numbers.get(name).copied().unwrap_or_default();
                self.sql.push('$');
                self.sql.push_str(&number.to_string());
            }
            PlaceholderStyle::Positional => {
                let value = self
                    .parameters
                    .iter()
                    .find(|p| p.name == name)
                    .map(|p| p.value.clone())
                    .unwrap_or(Value::Null);
                self.parameters.push(Parameter {
                    name: name.to_string(),
                    value,
                });
                self.sql.push('?');
            }
        }
    }

    fn allocate(&mut self, base: &str) -> String {
        let base = format!("{}{}", self.prefix, sanitize(base));
        let mut candidate = base.clone();
        let mut suffix = 0;
        while self.names.contains(&candidate) {
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }
        self.names.insert(candidate.clone());
        candidate
    }

    pub(crate) fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub(crate) fn finish(self) -> (String, Vec<Parameter>) {
        (self.sql, self.parameters)
    }
}

/// Reduce a field name to characters every placeholder syntax accepts.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "p".to_string()
    } else {
        cleaned
    }
}
