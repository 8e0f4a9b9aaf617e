//! SQL dialects.
//!
//! A [`Dialect`] describes one backend's syntax and limits. The statement
//! builder's algorithms never branch on a backend by name, only on what
//! its dialect reports, so a new backend is added by implementing this
//! trait.

use std::fmt;

/// How parameters are written into SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `@Name`, `:Name`: one placeholder per parameter name.
    Named(char),
    /// `$1`, `$2`: numbered in binding order.
    Numbered,
    /// `?`: bound strictly by position.
    Positional,
}

/// Native upsert construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertSyntax {
    /// `MERGE INTO ... USING ... WHEN MATCHED ... WHEN NOT MATCHED ...`
    Merge,
    /// `INSERT ... ON CONFLICT (key) DO UPDATE SET ...`
    OnConflict,
    /// `INSERT ... ON DUPLICATE KEY UPDATE ...`
    OnDuplicateKey,
    /// No native upsert: `UPDATE` followed by a guarded `INSERT`.
    UpdateThenInsert,
    /// Merge cannot be expressed at all.
    Unsupported,
}

/// Row-limit and paging syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingSyntax {
    /// `SELECT TOP (n)` and `OFFSET m ROWS FETCH NEXT n ROWS ONLY`.
    TopOffsetFetch,
    /// `LIMIT n` and `LIMIT n OFFSET m`.
    LimitOffset,
}

/// How an insert reports the generated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySyntax {
    /// `OUTPUT INSERTED.col` before `VALUES`.
    OutputInserted,
    /// `RETURNING col` after `VALUES`.
    Returning,
    /// A trailing `SELECT <function>` statement.
    Select(&'static str),
    /// Identity values cannot be read back.
    Unsupported,
}

/// One database backend's SQL syntax and capability limits.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Quote an identifier.
    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Maximum number of parameters one statement may bind.
    fn max_parameters(&self) -> usize;

    fn upsert_syntax(&self) -> UpsertSyntax;

    fn paging_syntax(&self) -> PagingSyntax {
        PagingSyntax::LimitOffset
    }

    fn identity_syntax(&self) -> IdentitySyntax;

    /// Session function yielding the identity generated by the last insert.
    fn identity_function(&self) -> Option<&'static str> {
        match self.identity_syntax() {
            IdentitySyntax::Select(function) => Some(function),
            _ => None,
        }
    }

    /// Whether `TRUNCATE TABLE` exists; otherwise `DELETE FROM` is used.
    fn supports_truncate(&self) -> bool {
        true
    }

    /// Separator between statements sent in one round trip.
    fn statement_separator(&self) -> &'static str {
        "; "
    }

    /// Terminator required after a complete `MERGE` statement.
    fn merge_terminator(&self) -> &'static str {
        ""
    }
}

/// Microsoft SQL Server.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named('@')
    }

    fn max_parameters(&self) -> usize {
        2100
    }

    fn upsert_syntax(&self) -> UpsertSyntax {
        UpsertSyntax::Merge
    }

    fn paging_syntax(&self) -> PagingSyntax {
        PagingSyntax::TopOffsetFetch
    }

    fn identity_syntax(&self) -> IdentitySyntax {
        IdentitySyntax::OutputInserted
    }

    fn identity_function(&self) -> Option<&'static str> {
        Some("SCOPE_IDENTITY()")
    }

    fn merge_terminator(&self) -> &'static str {
        ";"
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn upsert_syntax(&self) -> UpsertSyntax {
        UpsertSyntax::OnConflict
    }

    fn identity_syntax(&self) -> IdentitySyntax {
        IdentitySyntax::Returning
    }

    fn identity_function(&self) -> Option<&'static str> {
        Some("lastval()")
    }
}

/// MySQL and MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    fn max_parameters(&self) -> usize {
        65535
    }

    fn upsert_syntax(&self) -> UpsertSyntax {
        UpsertSyntax::OnDuplicateKey
    }

    fn identity_syntax(&self) -> IdentitySyntax {
        IdentitySyntax::Select("LAST_INSERT_ID()")
    }
}

/// SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named('@')
    }

    fn max_parameters(&self) -> usize {
        999
    }

    fn upsert_syntax(&self) -> UpsertSyntax {
        UpsertSyntax::OnConflict
    }

    fn identity_syntax(&self) -> IdentitySyntax {
        IdentitySyntax::Returning
    }

    fn identity_function(&self) -> Option<&'static str> {
        Some("last_insert_rowid()")
    }

    fn supports_truncate(&self) -> bool {
        false
    }
}
