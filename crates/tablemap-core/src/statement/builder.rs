//! Dialect-aware statement builder.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use tablemap_proto::{
    Conjunction, Error as ExprError, Operator, OrderDirection, OrderField, QueryField, QueryGroup,
    QueryNode, Value,
};

use super::dialect::{Dialect, IdentitySyntax, PagingSyntax, PlaceholderStyle, UpsertSyntax};
use super::writer::SqlWriter;
use super::{Aggregate, SelectOptions, Statement, StatementKind};
use crate::accessor::convert;
use crate::catalog::{ClassMap, FieldMap};
use crate::error::{Error, Result};

/// One select of a multi-result statement.
#[derive(Debug, Clone, Copy)]
pub struct SelectRequest<'a> {
    pub map: &'a ClassMap,
    pub filter: Option<&'a QueryGroup>,
    pub options: &'a SelectOptions,
}

/// Builds parameterized SQL for one dialect.
///
/// Predicates are walked pre-order, left to right; parameters are bound in
/// exactly that order. Predicate values pass through the field's handler
/// and the conversion policy before they are bound, except `LIKE` patterns,
/// which are bound as given.
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    dialect: Arc<dyn Dialect>,
}

impl StatementBuilder {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    fn writer(&self) -> SqlWriter<'_> {
        SqlWriter::new(self.dialect.as_ref())
    }

    fn finish(&self, kind: StatementKind, writer: SqlWriter<'_>) -> Statement {
        let (sql, parameters) = writer.finish();
        trace!(kind = kind.as_str(), %sql, parameters = parameters.len(), "built statement");
        Statement::new(kind, sql, parameters)
    }

    /// `SELECT ... FROM ... [WHERE ...] [ORDER BY ...]`, limited to `options.top` rows.
    pub fn select(
        &self,
        map: &ClassMap,
        filter: Option<&QueryGroup>,
        options: &SelectOptions,
    ) -> Result<Statement> {
        let mut w = self.writer();
        self.write_select(&mut w, map, filter, options)?;
        Ok(self.finish(StatementKind::Select, w))
    }

    /// One page of an ordered select. Pages are numbered from zero.
    pub fn select_paged(
        &self,
        map: &ClassMap,
        filter: Option<&QueryGroup>,
        order_by: &[OrderField],
        page: u64,
        rows_per_page: u64,
    ) -> Result<Statement> {
        if order_by.is_empty() {
            return Err(ExprError::InvalidValue(
                "a paged query needs at least one order field".into(),
            )
            .into());
        }
        if rows_per_page == 0 {
            return Err(ExprError::InvalidValue("rows per page must be at least 1".into()).into());
        }
        let skip = page.checked_mul(rows_per_page).ok_or_else(|| {
            Error::from(ExprError::InvalidValue(format!(
                "page {page} of {rows_per_page} rows is out of range"
            )))
        })?;

        let mut w = self.writer();
        w.push("SELECT ");
        self.write_columns(&mut w, &projection(map, None)?);
        self.write_from(&mut w, map);
        self.write_where(&mut w, map, filter)?;
        self.write_order_by(&mut w, map, order_by)?;
        match self.dialect.paging_syntax() {
            PagingSyntax::TopOffsetFetch => w.push(&format!(
                " OFFSET {skip} ROWS FETCH NEXT {rows_per_page} ROWS ONLY"
            )),
            PagingSyntax::LimitOffset => w.push(&format!(" LIMIT {rows_per_page} OFFSET {skip}")),
        }
        Ok(self.finish(StatementKind::Paged, w))
    }

    /// `SELECT <function>(...) FROM ...`. Only `Count` works without a field.
    pub fn aggregate(
        &self,
        map: &ClassMap,
        function: Aggregate,
        field: Option<&str>,
        filter: Option<&QueryGroup>,
    ) -> Result<Statement> {
        let mut w = self.writer();
        w.push("SELECT ");
        w.push(function.function());
        w.push("(");
        match (function, field) {
            (_, Some(name)) => w.push_identifier(map.require_field(name)?.column()),
            (Aggregate::Count, None) => w.push("*"),
            (_, None) => {
                return Err(ExprError::InvalidValue(format!(
                    "{} requires a field",
                    function.function()
                ))
                .into())
            }
        }
        w.push(") AS ");
        w.push_identifier(function.alias());
        self.write_from(&mut w, map);
        self.write_where(&mut w, map, filter)?;
        Ok(self.finish(StatementKind::Aggregate, w))
    }

    /// A single-row existence check: returns one row if any row matches.
    pub fn exists(&self, map: &ClassMap, filter: Option<&QueryGroup>) -> Result<Statement> {
        let mut w = self.writer();
        w.push("SELECT ");
        if self.dialect.paging_syntax() == PagingSyntax::TopOffsetFetch {
            w.push("TOP (1) ");
        }
        w.push("1 AS ");
        w.push_identifier("ExistsValue");
        self.write_from(&mut w, map);
        self.write_where(&mut w, map, filter)?;
        if self.dialect.paging_syntax() == PagingSyntax::LimitOffset {
            w.push(" LIMIT 1");
        }
        Ok(self.finish(StatementKind::Exists, w))
    }

    /// `DELETE FROM ... [WHERE ...]`.
    pub fn delete(&self, map: &ClassMap, filter: Option<&QueryGroup>) -> Result<Statement> {
        let mut w = self.writer();
        w.push("DELETE");
        self.write_from(&mut w, map);
        self.write_where(&mut w, map, filter)?;
        Ok(self.finish(StatementKind::Delete, w))
    }

    /// `TRUNCATE TABLE`, or `DELETE FROM` where truncation is unavailable.
    pub fn truncate(&self, map: &ClassMap) -> Result<Statement> {
        let mut w = self.writer();
        if self.dialect.supports_truncate() {
            w.push("TRUNCATE TABLE ");
            w.push_identifier(map.table());
        } else {
            w.push("DELETE");
            self.write_from(&mut w, map);
        }
        Ok(self.finish(StatementKind::Truncate, w))
    }

    /// Insert one row. `values` align with `fields`.
    ///
    /// When the table has an identity field the statement returns the
    /// generated value, in the dialect's syntax.
    pub fn insert(
        &self,
        map: &ClassMap,
        fields: &[&FieldMap],
        values: Vec<Value>,
    ) -> Result<Statement> {
        check_row(fields, &values)?;
        let identity = map.identity();
        let syntax = self.dialect.identity_syntax();

        let mut w = self.writer();
        self.write_insert_head(&mut w, map, fields);
        if let (Some(identity), IdentitySyntax::OutputInserted) = (identity, syntax) {
            w.push(" OUTPUT ");
            w.push_qualified("INSERTED", identity.column());
        }
        w.push(" VALUES ");
        write_values_row(&mut w, fields, values, None);

        let mut returning = None;
        if let Some(identity) = identity {
            match syntax {
                IdentitySyntax::OutputInserted => returning = Some(identity.name().to_string()),
                IdentitySyntax::Returning => {
                    w.push(" RETURNING ");
                    w.push_identifier(identity.column());
                    returning = Some(identity.name().to_string());
                }
                IdentitySyntax::Select(function) => {
                    w.push(self.dialect.statement_separator());
                    w.push("SELECT ");
                    w.push(function);
                    returning = Some(identity.name().to_string());
                }
                IdentitySyntax::Unsupported => {}
            }
        }

        let mut statement = self.finish(StatementKind::Insert, w);
        statement.rows = 1;
        statement.returning = returning;
        Ok(statement)
    }

    /// Multi-row inserts, chunked under the dialect's parameter ceiling.
    pub fn batch_insert(
        &self,
        map: &ClassMap,
        fields: &[&FieldMap],
        rows: Vec<Vec<Value>>,
        batch_size: usize,
    ) -> Result<Vec<Statement>> {
        for row in &rows {
            check_row(fields, row)?;
        }
        let per_chunk = self.rows_per_chunk(fields.len(), batch_size)?;

        let statements: Vec<Statement> = chunks(rows, per_chunk)
            .map(|chunk| {
                let count = chunk.len();
                let mut w = self.writer();
                self.write_insert_head(&mut w, map, fields);
                w.push(" VALUES ");
                for (i, row) in chunk.into_iter().enumerate() {
                    if i > 0 {
                        w.push_comma();
                    }
                    write_values_row(&mut w, fields, row, Some(i));
                }
                let mut statement = self.finish(StatementKind::BatchInsert, w);
                statement.rows = count;
                statement
            })
            .collect();

        log_chunks(StatementKind::BatchInsert, map, &statements, per_chunk);
        Ok(statements)
    }

    /// Update one row by key. `values` align with `set`.
    pub fn update(
        &self,
        map: &ClassMap,
        set: &[&FieldMap],
        values: Vec<Value>,
        key: Value,
    ) -> Result<Statement> {
        check_row(set, &values)?;
        let key_field = map.require_key("update")?;
        if set.is_empty() {
            return Err(ExprError::InvalidValue("update sets no fields".into()).into());
        }

        let mut w = self.writer();
        self.write_update_row(&mut w, map, set, values, key_field, key, None)?;
        let mut statement = self.finish(StatementKind::Update, w);
        statement.rows = 1;
        Ok(statement)
    }

    /// Per-row updates by key, grouped into chunks sent as one round trip each.
    pub fn batch_update(
        &self,
        map: &ClassMap,
        set: &[&FieldMap],
        rows: Vec<(Vec<Value>, Value)>,
        batch_size: usize,
    ) -> Result<Vec<Statement>> {
        for (values, _) in &rows {
            check_row(set, values)?;
        }
        let key_field = map.require_key("update")?;
        if set.is_empty() {
            return Err(ExprError::InvalidValue("update sets no fields".into()).into());
        }
        let per_chunk = self.rows_per_chunk(set.len() + 1, batch_size)?;

        let mut statements = Vec::new();
        for chunk in chunks(rows, per_chunk) {
            let count = chunk.len();
            let mut w = self.writer();
            for (i, (values, key)) in chunk.into_iter().enumerate() {
                if i > 0 {
                    w.push(self.dialect.statement_separator());
                }
                self.write_update_row(&mut w, map, set, values, key_field, key, Some(i))?;
            }
            let mut statement = self.finish(StatementKind::BatchUpdate, w);
            statement.rows = count;
            statements.push(statement);
        }

        log_chunks(StatementKind::BatchUpdate, map, &statements, per_chunk);
        Ok(statements)
    }

    /// Insert or update one row, matching on `qualifiers`.
    ///
    /// `values` align with `fields`, and every qualifier must be one of
    /// `fields`. Uses the dialect's native upsert, or an update followed by
    /// a guarded insert where the dialect has none.
    ///
    /// The identity is never inserted. When it is a qualifier the statement
    /// returns the identity of the merged row, and dialects that upsert on
    /// a conflicting value use the update-then-insert form instead.
    pub fn merge(
        &self,
        map: &ClassMap,
        fields: &[&FieldMap],
        qualifiers: &[&FieldMap],
        values: Vec<Value>,
    ) -> Result<Statement> {
        check_row(fields, &values)?;
        let plan = MergePlan::new(map, fields, qualifiers)?;
        let mut w = self.writer();
        let returns_identity = self.write_merge(&mut w, &plan, vec![values], false)?;
        let mut statement = self.finish(StatementKind::Merge, w);
        statement.rows = 1;
        if returns_identity {
            statement.returning = plan.identity.map(|f| f.name().to_string());
        }
        Ok(statement)
    }

    /// Chunked [`merge`](Self::merge) of many rows.
    pub fn batch_merge(
        &self,
        map: &ClassMap,
        fields: &[&FieldMap],
        qualifiers: &[&FieldMap],
        rows: Vec<Vec<Value>>,
        batch_size: usize,
    ) -> Result<Vec<Statement>> {
        if self.dialect.upsert_syntax() == UpsertSyntax::Unsupported {
            return Err(self.merge_unsupported());
        }
        for row in &rows {
            check_row(fields, row)?;
        }
        let plan = MergePlan::new(map, fields, qualifiers)?;
        let per_chunk = self.rows_per_chunk(self.merge_params_per_row(&plan), batch_size)?;

        let mut statements = Vec::new();
        for chunk in chunks(rows, per_chunk) {
            let count = chunk.len();
            let mut w = self.writer();
            self.write_merge(&mut w, &plan, chunk, true)?;
            let mut statement = self.finish(StatementKind::BatchMerge, w);
            statement.rows = count;
            statements.push(statement);
        }

        log_chunks(StatementKind::BatchMerge, map, &statements, per_chunk);
        Ok(statements)
    }

    /// Several selects in one round trip.
    ///
    /// The parameters of select `i` are prefixed with `T{i}_` so that
    /// placeholders of different selects never collide.
    pub fn multi_select(&self, requests: &[SelectRequest<'_>]) -> Result<Statement> {
        if requests.is_empty() {
            return Err(ExprError::InvalidValue("a multi-result query needs a select".into()).into());
        }
        let mut w = self.writer();
        for (i, request) in requests.iter().enumerate() {
            if i > 0 {
                w.push(self.dialect.statement_separator());
            }
            w.set_prefix(format!("T{i}_"));
            self.write_select(&mut w, request.map, request.filter, request.options)?;
        }
        Ok(self.finish(StatementKind::MultiResult, w))
    }

    /// The values a predicate binds, in binding order.
    ///
    /// Matches the parameter order of every statement built from the same
    /// predicate, so cached command text can be rebound with it.
    pub fn filter_values(&self, map: &ClassMap, filter: Option<&QueryGroup>) -> Result<Vec<Value>> {
        let Some(group) = filter else {
            return Ok(Vec::new());
        };
        group.validate()?;
        let mut values = Vec::new();
        for query_field in group.flatten() {
            let field = map.require_field(query_field.field().name())?;
            values.extend(operand_values(field, query_field)?);
        }
        Ok(values)
    }

    /// Rows per chunk when each row binds `per_row` parameters.
    pub fn rows_per_chunk(&self, per_row: usize, batch_size: usize) -> Result<usize> {
        if per_row == 0 {
            return Err(ExprError::InvalidValue("a batch row binds no parameters".into()).into());
        }
        let by_limit = self.dialect.max_parameters() / per_row;
        if by_limit == 0 {
            return Err(Error::DialectCapability {
                dialect: self.dialect.name(),
                capability: "rows wider than its parameter limit",
            });
        }
        Ok(by_limit.min(batch_size.max(1)))
    }

    fn write_select(
        &self,
        w: &mut SqlWriter<'_>,
        map: &ClassMap,
        filter: Option<&QueryGroup>,
        options: &SelectOptions,
    ) -> Result<()> {
        let columns = projection(map, options.fields.as_deref())?;
        let paging = self.dialect.paging_syntax();

        w.push("SELECT ");
        if let (PagingSyntax::TopOffsetFetch, Some(top)) = (paging, options.top) {
            w.push(&format!("TOP ({top}) "));
        }
        self.write_columns(w, &columns);
        self.write_from(w, map);
        self.write_where(w, map, filter)?;
        self.write_order_by(w, map, &options.order_by)?;
        if let (PagingSyntax::LimitOffset, Some(top)) = (paging, options.top) {
            w.push(&format!(" LIMIT {top}"));
        }
        Ok(())
    }

    fn write_columns(&self, w: &mut SqlWriter<'_>, columns: &[&FieldMap]) {
        w.push_list(columns, ", ", |w, field| w.push_identifier(field.column()));
    }

    fn write_from(&self, w: &mut SqlWriter<'_>, map: &ClassMap) {
        w.push(" FROM ");
        w.push_identifier(map.table());
    }

    fn write_where(
        &self,
        w: &mut SqlWriter<'_>,
        map: &ClassMap,
        filter: Option<&QueryGroup>,
    ) -> Result<()> {
        let Some(group) = filter else {
            return Ok(());
        };
        group.validate()?;
        if group.is_empty() {
            if group.is_negated() {
                w.push(" WHERE 1 = 0");
            }
            return Ok(());
        }
        w.push(" WHERE ");
        self.write_group(w, map, group)
    }

    fn write_group(&self, w: &mut SqlWriter<'_>, map: &ClassMap, group: &QueryGroup) -> Result<()> {
        if group.is_negated() {
            w.push("NOT (");
        }
        let separator = match group.conjunction() {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        };
        for (i, child) in group.children().iter().enumerate() {
            if i > 0 {
                w.push(separator);
            }
            match child {
                QueryNode::Field(field) => self.write_field(w, map, field)?,
                QueryNode::Group(nested) if nested.is_negated() => {
                    self.write_group(w, map, nested)?
                }
                QueryNode::Group(nested) => {
                    w.push("(");
                    self.write_group(w, map, nested)?;
                    w.push(")");
                }
            }
        }
        if group.is_negated() {
            w.push(")");
        }
        Ok(())
    }

    fn write_field(
        &self,
        w: &mut SqlWriter<'_>,
        map: &ClassMap,
        query_field: &QueryField,
    ) -> Result<()> {
        let field = map.require_field(query_field.field().name())?;
        let base = field.name();
        let mut values = operand_values(field, query_field)?.into_iter();

        w.push_identifier(field.column());
        match query_field.operator() {
            Operator::IsNull => w.push(" IS NULL"),
            Operator::IsNotNull => w.push(" IS NOT NULL"),
            op @ (Operator::In | Operator::NotIn) => {
                w.push(if op == Operator::In { " IN (" } else { " NOT IN (" });
                for (i, value) in values.enumerate() {
                    if i > 0 {
                        w.push_comma();
                    }
                    w.bind(&format!("{base}_In_{i}"), value);
                }
                w.push(")");
            }
            op @ (Operator::Between | Operator::NotBetween) => {
                w.push(if op == Operator::Between {
                    " BETWEEN "
                } else {
                    " NOT BETWEEN "
                });
                let low = values.next().unwrap_or(Value::Null);
                let high = values.next().unwrap_or(Value::Null);
                w.bind(&format!("{base}_Left"), low);
                w.push(" AND ");
                w.bind(&format!("{base}_Right"), high);
            }
            op => {
                w.push(" ");
                w.push(comparison(op));
                w.push(" ");
                w.bind(base, values.next().unwrap_or(Value::Null));
            }
        }
        Ok(())
    }

    fn write_order_by(
        &self,
        w: &mut SqlWriter<'_>,
        map: &ClassMap,
        order_by: &[OrderField],
    ) -> Result<()> {
        if order_by.is_empty() {
            return Ok(());
        }
        let columns = order_by
            .iter()
            .map(|order| Ok((map.require_field(&order.field)?.column(), order.direction)))
            .collect::<Result<Vec<_>>>()?;

        w.push(" ORDER BY ");
        w.push_list(columns, ", ", |w, (column, direction)| {
            w.push_identifier(column);
            w.push(match direction {
                OrderDirection::Asc => " ASC",
                OrderDirection::Desc => " DESC",
            });
        });
        Ok(())
    }

    fn write_insert_head(&self, w: &mut SqlWriter<'_>, map: &ClassMap, fields: &[&FieldMap]) {
        w.push("INSERT INTO ");
        w.push_identifier(map.table());
        w.push(" (");
        self.write_columns(w, fields);
        w.push(")");
    }

    #[allow(clippy::too_many_arguments)]
    fn write_update_row(
        &self,
        w: &mut SqlWriter<'_>,
        map: &ClassMap,
        set: &[&FieldMap],
        values: Vec<Value>,
        key_field: &FieldMap,
        key: Value,
        row: Option<usize>,
    ) -> Result<()> {
        if key.is_null() {
            return Err(ExprError::NullComparison {
                field: key_field.name().to_string(),
                operator: Operator::Equal,
            }
            .into());
        }
        w.push("UPDATE ");
        w.push_identifier(map.table());
        w.push(" SET ");
        let pairs: Vec<_> = set.iter().zip(values).collect();
        w.push_list(pairs, ", ", |w, (field, value)| {
            w.push_identifier(field.column());
            w.push(" = ");
            w.bind(&param_base(field, row), value);
        });
        w.push(" WHERE ");
        w.push_identifier(key_field.column());
        w.push(" = ");
        w.bind(&param_base(key_field, row), key);
        Ok(())
    }

    /// Upsert form used for `plan`.
    ///
    /// `ON CONFLICT` and `ON DUPLICATE KEY` only fire on a value the insert
    /// supplies, and the identity is generated, so identity-qualified merges
    /// fall back to update-then-insert.
    fn merge_syntax(&self, plan: &MergePlan<'_>) -> UpsertSyntax {
        match self.dialect.upsert_syntax() {
            UpsertSyntax::OnConflict | UpsertSyntax::OnDuplicateKey if plan.identity.is_some() => {
                UpsertSyntax::UpdateThenInsert
            }
            syntax => syntax,
        }
    }

    fn merge_unsupported(&self) -> Error {
        Error::DialectCapability {
            dialect: self.dialect.name(),
            capability: "merge",
        }
    }

    fn merge_params_per_row(&self, plan: &MergePlan<'_>) -> usize {
        match (self.merge_syntax(plan), self.dialect.placeholder_style()) {
            (UpsertSyntax::UpdateThenInsert, PlaceholderStyle::Positional) => {
                let update = if plan.updates.is_empty() {
                    0
                } else {
                    plan.updates.len() + plan.qualifiers.len()
                };
                update + plan.inserts.len() + plan.qualifiers.len()
            }
            _ => plan.fields.len(),
        }
    }

    /// Writes the merge of `rows`; true if it returns the merged identity.
    ///
    /// Only unsuffixed (single-row) merges read the identity back.
    fn write_merge(
        &self,
        w: &mut SqlWriter<'_>,
        plan: &MergePlan<'_>,
        rows: Vec<Vec<Value>>,
        suffixed: bool,
    ) -> Result<bool> {
        let read_identity = !suffixed && plan.identity.is_some();
        match self.merge_syntax(plan) {
            UpsertSyntax::Merge => {
                self.write_native_merge(w, plan, rows, suffixed, read_identity)?;
                Ok(read_identity)
            }
            UpsertSyntax::OnConflict => {
                self.write_multi_insert(w, plan, rows, suffixed);
                w.push(" ON CONFLICT (");
                self.write_columns(w, &plan.qualifiers);
                w.push(")");
                if plan.updates.is_empty() {
                    w.push(" DO NOTHING");
                } else {
                    w.push(" DO UPDATE SET ");
                    w.push_list(&plan.updates, ", ", |w, field| {
                        w.push_identifier(field.column());
                        w.push(" = ");
                        w.push_qualified("excluded", field.column());
                    });
                }
                Ok(false)
            }
            UpsertSyntax::OnDuplicateKey => {
                self.write_multi_insert(w, plan, rows, suffixed);
                w.push(" ON DUPLICATE KEY UPDATE ");
                if plan.updates.is_empty() {
                    w.push_list(&plan.qualifiers, ", ", |w, field| {
                        w.push_identifier(field.column());
                        w.push(" = ");
                        w.push_identifier(field.column());
                    });
                } else {
                    w.push_list(&plan.updates, ", ", |w, field| {
                        w.push_identifier(field.column());
                        w.push(" = VALUES(");
                        w.push_identifier(field.column());
                        w.push(")");
                    });
                }
                Ok(false)
            }
            UpsertSyntax::UpdateThenInsert => {
                let mut last = None;
                for (i, row) in rows.into_iter().enumerate() {
                    if i > 0 {
                        w.push(self.dialect.statement_separator());
                    }
                    last = Some(self.write_fallback_merge_row(w, plan, row, suffixed.then_some(i))?);
                }
                match (read_identity, plan.identity, self.dialect.identity_function(), last) {
                    (true, Some(identity), Some(function), Some(mut bindings)) => {
                        self.write_identity_readback(w, plan, identity, function, &mut bindings);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
            UpsertSyntax::Unsupported => Err(self.merge_unsupported()),
        }
    }

    fn write_multi_insert(
        &self,
        w: &mut SqlWriter<'_>,
        plan: &MergePlan<'_>,
        rows: Vec<Vec<Value>>,
        suffixed: bool,
    ) {
        self.write_insert_head(w, plan.map, &plan.inserts);
        w.push(" VALUES ");
        for (i, row) in rows.into_iter().enumerate() {
            if i > 0 {
                w.push_comma();
            }
            let row = plan
                .fields
                .iter()
                .zip(row)
                .filter(|(field, _)| !plan.map.is_identity(field.name()))
                .map(|(_, value)| value)
                .collect();
            write_values_row(w, &plan.inserts, row, suffixed.then_some(i));
        }
    }

    fn write_native_merge(
        &self,
        w: &mut SqlWriter<'_>,
        plan: &MergePlan<'_>,
        rows: Vec<Vec<Value>>,
        suffixed: bool,
        read_identity: bool,
    ) -> Result<()> {
        w.push("MERGE INTO ");
        w.push_identifier(plan.map.table());
        w.push(" AS T USING (VALUES ");
        for (i, row) in rows.into_iter().enumerate() {
            if i > 0 {
                w.push_comma();
            }
            write_values_row(w, &plan.fields, row, suffixed.then_some(i));
        }
        w.push(") AS S (");
        self.write_columns(w, &plan.fields);
        w.push(") ON (");
        w.push_list(&plan.qualifiers, " AND ", |w, field| {
            w.push_qualified("T", field.column());
            w.push(" = ");
            w.push_qualified("S", field.column());
        });
        w.push(")");
        if !plan.updates.is_empty() {
            w.push(" WHEN MATCHED THEN UPDATE SET ");
            w.push_list(&plan.updates, ", ", |w, field| {
                w.push_qualified("T", field.column());
                w.push(" = ");
                w.push_qualified("S", field.column());
            });
        }
        w.push(" WHEN NOT MATCHED THEN INSERT (");
        self.write_columns(w, &plan.inserts);
        w.push(") VALUES (");
        w.push_list(&plan.inserts, ", ", |w, field| {
            w.push_qualified("S", field.column())
        });
        w.push(")");
        if let (true, Some(identity)) = (read_identity, plan.identity) {
            w.push(" OUTPUT ");
            w.push_qualified("INSERTED", identity.column());
        }
        w.push(self.dialect.merge_terminator());
        Ok(())
    }

    fn write_fallback_merge_row(
        &self,
        w: &mut SqlWriter<'_>,
        plan: &MergePlan<'_>,
        row: Vec<Value>,
        index: Option<usize>,
    ) -> Result<RowBindings> {
        let mut bindings = RowBindings::new(plan, row, index);
        for qualifier in &plan.qualifiers {
            if bindings.value(qualifier).is_null() {
                return Err(ExprError::NullComparison {
                    field: qualifier.name().to_string(),
                    operator: Operator::Equal,
                }
                .into());
            }
        }

        if !plan.updates.is_empty() {
            w.push("UPDATE ");
            w.push_identifier(plan.map.table());
            w.push(" SET ");
            for (i, field) in plan.updates.iter().copied().enumerate() {
                if i > 0 {
                    w.push_comma();
                }
                w.push_identifier(field.column());
                w.push(" = ");
                bindings.place(w, field);
            }
            self.write_qualifier_match(w, plan, &mut bindings);
            w.push(self.dialect.statement_separator());
        }

        self.write_insert_head(w, plan.map, &plan.inserts);
        w.push(" SELECT ");
        for (i, field) in plan.inserts.iter().copied().enumerate() {
            if i > 0 {
                w.push_comma();
            }
            bindings.place(w, field);
        }
        w.push(" WHERE NOT EXISTS (SELECT 1");
        self.write_from(w, plan.map);
        self.write_qualifier_match(w, plan, &mut bindings);
        w.push(")");
        Ok(bindings)
    }

    /// `SELECT COALESCE((SELECT id FROM t WHERE <qualifiers>), <last identity>)`:
    /// the matched row's identity, else the one the guarded insert generated.
    fn write_identity_readback(
        &self,
        w: &mut SqlWriter<'_>,
        plan: &MergePlan<'_>,
        identity: &FieldMap,
        function: &str,
        bindings: &mut RowBindings,
    ) {
        w.push(self.dialect.statement_separator());
        w.push("SELECT COALESCE((SELECT ");
        w.push_identifier(identity.column());
        self.write_from(w, plan.map);
        self.write_qualifier_match(w, plan, bindings);
        w.push("), ");
        w.push(function);
        w.push(")");
    }

    fn write_qualifier_match(
        &self,
        w: &mut SqlWriter<'_>,
        plan: &MergePlan<'_>,
        bindings: &mut RowBindings,
    ) {
        w.push(" WHERE ");
        for (i, field) in plan.qualifiers.iter().copied().enumerate() {
            if i > 0 {
                w.push(" AND ");
            }
            w.push_identifier(field.column());
            w.push(" = ");
            bindings.place(w, field);
        }
    }
}

/// Values of one fallback-merge row; each is bound once and referenced after.
struct RowBindings {
    values: HashMap<String, Value>,
    bound: HashMap<String, String>,
    index: Option<usize>,
}

impl RowBindings {
    fn new(plan: &MergePlan<'_>, row: Vec<Value>, index: Option<usize>) -> Self {
        let values = plan
            .fields
            .iter()
            .map(|f| f.name().to_string())
            .zip(row)
            .collect();
        Self {
            values,
            bound: HashMap::new(),
            index,
        }
    }

    fn value(&self, field: &FieldMap) -> Value {
        self.values.get(field.name()).cloned().unwrap_or(Value::Null)
    }

    fn place(&mut self, w: &mut SqlWriter<'_>, field: &FieldMap) {
        if let Some(name) = self.bound.get(field.name()) {
            w.rebind(name);
            return;
        }
        let value = self.value(field);
        let name = w.bind(&param_base(field, self.index), value);
        self.bound.insert(field.name().to_string(), name);
    }
}

/// Field lists of one merge.
struct MergePlan<'a> {
    map: &'a ClassMap,
    fields: Vec<&'a FieldMap>,
    qualifiers: Vec<&'a FieldMap>,
    updates: Vec<&'a FieldMap>,
    /// Columns of the insert branch; never the identity.
    inserts: Vec<&'a FieldMap>,
    /// The identity field, when it is a qualifier.
    identity: Option<&'a FieldMap>,
}

impl<'a> MergePlan<'a> {
    fn new(
        map: &'a ClassMap,
        fields: &[&'a FieldMap],
        qualifiers: &[&'a FieldMap],
    ) -> Result<Self> {
        if qualifiers.is_empty() {
            return Err(Error::Mapping(format!(
                "merge into '{}' requires a qualifier, primary key or identity field",
                map.table()
            )));
        }
        for qualifier in qualifiers {
            if !fields.iter().any(|f| f.name() == qualifier.name()) {
                return Err(Error::Mapping(format!(
                    "merge qualifier '{}' is not among the merged fields",
                    qualifier.name()
                )));
            }
        }
        let updates = fields
            .iter()
            .copied()
            .filter(|f| {
                !map.is_identity(f.name()) && !qualifiers.iter().any(|q| q.name() == f.name())
            })
            .collect();
        let inserts: Vec<&FieldMap> = fields
            .iter()
            .copied()
            .filter(|f| !map.is_identity(f.name()))
            .collect();
        if inserts.is_empty() {
            return Err(Error::Mapping(format!(
                "merge into '{}' has no field to insert besides the identity",
                map.table()
            )));
        }
        let identity = qualifiers.iter().copied().find(|q| map.is_identity(q.name()));
        Ok(Self {
            map,
            fields: fields.to_vec(),
            qualifiers: qualifiers.to_vec(),
            updates,
            inserts,
            identity,
        })
    }
}

/// Bound values of one predicate, in binding order.
fn operand_values(field: &FieldMap, query_field: &QueryField) -> Result<Vec<Value>> {
    let raw = query_field.operand().values().cloned();
    match query_field.operator() {
        Operator::Like | Operator::NotLike => Ok(raw.collect()),
        _ => raw
            .map(|value| {
                let db = convert::to_db(field, value.clone())?;
                if db.is_null() && !value.is_null() {
                    // `= NULL` never matches; refuse rather than return nothing.
                    return Err(Error::conversion(
                        field.name(),
                        value,
                        "the field's handler maps this value to null",
                    ));
                }
                Ok(db)
            })
            .collect(),
    }
}

fn comparison(op: Operator) -> &'static str {
    match op {
        Operator::Equal => "=",
        Operator::NotEqual => "<>",
        Operator::LessThan => "<",
        Operator::LessThanOrEqual => "<=",
        Operator::GreaterThan => ">",
        Operator::GreaterThanOrEqual => ">=",
        Operator::Like => "LIKE",
        Operator::NotLike => "NOT LIKE",
        // Rendered by their own arms in write_field.
        Operator::In
        | Operator::NotIn
        | Operator::Between
        | Operator::NotBetween
        | Operator::IsNull
        | Operator::IsNotNull => "",
    }
}

fn projection<'a>(map: &'a ClassMap, fields: Option<&[String]>) -> Result<Vec<&'a FieldMap>> {
    match fields {
        None => Ok(map.fields().iter().collect()),
        Some([]) => Err(ExprError::InvalidValue("projection names no fields".into()).into()),
        Some(names) => names.iter().map(|name| map.require_field(name)).collect(),
    }
}

fn param_base(field: &FieldMap, row: Option<usize>) -> String {
    match row {
        Some(row) => format!("{}_{row}", field.name()),
        None => field.name().to_string(),
    }
}

fn write_values_row(
    w: &mut SqlWriter<'_>,
    fields: &[&FieldMap],
    values: Vec<Value>,
    row: Option<usize>,
) {
    w.push("(");
    let pairs: Vec<_> = fields.iter().zip(values).collect();
    w.push_list(pairs, ", ", |w, (field, value)| {
        w.bind(&param_base(field, row), value);
    });
    w.push(")");
}

fn check_row(fields: &[&FieldMap], values: &[Value]) -> Result<()> {
    if fields.len() != values.len() {
        return Err(ExprError::InvalidValue(format!(
            "expected {} values, got {}",
            fields.len(),
            values.len()
        ))
        .into());
    }
    Ok(())
}

fn chunks<T>(items: Vec<T>, size: usize) -> impl Iterator<Item = Vec<T>> {
    let mut items = items.into_iter().peekable();
    std::iter::from_fn(move || {
        items.peek()?;
        Some(items.by_ref().take(size).collect())
    })
}

fn log_chunks(kind: StatementKind, map: &ClassMap, statements: &[Statement], per_chunk: usize) {
    debug!(
        kind = kind.as_str(),
        table = map.table(),
        chunks = statements.len(),
        rows_per_chunk = per_chunk,
        "chunked batch statement"
    );
}
