//! The execution orchestrator.

use std::any::TypeId;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use tablemap_proto::{OrderField, QueryField, QueryGroup, ScalarType, Value};

use super::connection::Connection;
use super::multi::{MultiQuery, MultiResult};
use crate::accessor::{convert, AccessorCache};
use crate::cache::{CommandCache, CommandKey, ResultCache};
use crate::catalog::{ClassMap, Entity, FieldMap, MetadataResolver};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::handler::HandlerRegistry;
use crate::row::Row;
use crate::statement::{
    Aggregate, Dialect, SelectOptions, SelectRequest, Statement, StatementBuilder, StatementKind,
};

/// Sequences resolution, statement building, the connection call and
/// materialization for one dialect.
///
/// Each engine owns its own resolver, handler registry and caches; two
/// engines never share state. Every operation makes exactly one attempt
/// and returns the first error it meets. Batch operations run chunk by
/// chunk and stop at the first failing chunk; rows written by earlier
/// chunks stay written unless the caller's transaction rolls them back.
pub struct Engine {
    resolver: Arc<MetadataResolver>,
    accessors: Arc<AccessorCache>,
    results: Arc<ResultCache>,
    commands: Arc<CommandCache>,
    builder: StatementBuilder,
    config: EngineConfig,
}

impl Engine {
    /// Engine with the default configuration.
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        let config = EngineConfig::default();
        Self::build(dialect, Arc::new(HandlerRegistry::new()), config)
    }

    /// Engine with a validated configuration.
    pub fn with_config(dialect: Arc<dyn Dialect>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(dialect, Arc::new(HandlerRegistry::new()), config))
    }

    /// Engine using a prepared handler registry.
    ///
    /// Global handlers must be registered before the first operation; the
    /// registry is sealed when the first entity type is resolved.
    pub fn with_handlers(
        dialect: Arc<dyn Dialect>,
        handlers: Arc<HandlerRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(dialect, handlers, config))
    }

    fn build(dialect: Arc<dyn Dialect>, handlers: Arc<HandlerRegistry>, config: EngineConfig) -> Self {
        Self {
            resolver: Arc::new(MetadataResolver::new(handlers)),
            accessors: Arc::new(AccessorCache::new()),
            results: Arc::new(ResultCache::new(config.result_cache_capacity)),
            commands: Arc::new(CommandCache::new(config.command_cache_capacity)),
            builder: StatementBuilder::new(dialect),
            config,
        }
    }

    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        self.resolver.handlers()
    }

    pub fn accessors(&self) -> &AccessorCache {
        &self.accessors
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    pub fn command_cache(&self) -> &CommandCache {
        &self.commands
    }

    pub fn statements(&self) -> &StatementBuilder {
        &self.builder
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drop every cached class map, accessor, command text and result.
    ///
    /// Overrides and global handlers stay registered, but the handler
    /// registry remains sealed.
    pub fn reset(&self) {
        self.resolver.clear();
        self.accessors.clear();
        self.commands.clear();
        self.results.clear();
    }

    // ----- Queries -----

    /// Select entities matching `filter`.
    pub fn query<E: Entity>(
        &self,
        conn: &dyn Connection,
        filter: Option<&QueryGroup>,
        options: &SelectOptions,
    ) -> Result<Vec<E>> {
        let map = self.resolver.resolve::<E>()?;
        let statement = self.cached::<E, _, _>(&map, StatementKind::Select, filter, options, || {
            self.builder.select(&map, filter, options)
        })?;
        let rows = self.fetch(conn, &map, &statement)?;
        self.materialize(&map, &rows)
    }

    /// [`query`](Self::query) through the result cache.
    ///
    /// A live entry under `cache_key` is returned without touching the
    /// connection. On a miss the query runs and its result is stored for
    /// `ttl`, or the configured default when `ttl` is `None`.
    pub fn query_cached<E: Entity>(
        &self,
        conn: &dyn Connection,
        cache_key: &str,
        ttl: Option<Duration>,
        filter: Option<&QueryGroup>,
        options: &SelectOptions,
    ) -> Result<Arc<Vec<E>>> {
        if let Some(hit) = self.results.get::<Vec<E>>(cache_key) {
            return Ok(hit);
        }
        let entities = Arc::new(self.query::<E>(conn, filter, options)?);
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        self.results.set_shared(cache_key, Arc::clone(&entities), ttl);
        Ok(entities)
    }

    /// The entity whose key field equals `key`.
    pub fn query_by_key<E: Entity>(
        &self,
        conn: &dyn Connection,
        key: impl Into<Value>,
    ) -> Result<Option<E>> {
        let map = self.resolver.resolve::<E>()?;
        let filter = key_filter(&map, "query by key", key.into())?;
        let options = SelectOptions::new().top(1);
        Ok(self.query::<E>(conn, Some(&filter), &options)?.into_iter().next())
    }

    /// Page `page` (from zero) of `rows_per_page` entities in `order_by` order.
    pub fn query_paged<E: Entity>(
        &self,
        conn: &dyn Connection,
        filter: Option<&QueryGroup>,
        order_by: &[OrderField],
        page: u64,
        rows_per_page: u64,
    ) -> Result<Vec<E>> {
        let map = self.resolver.resolve::<E>()?;
        let statement = self
            .builder
            .select_paged(&map, filter, order_by, page, rows_per_page)?;
        let rows = self.fetch(conn, &map, &statement)?;
        self.materialize(&map, &rows)
    }

    /// Select rows of `E`'s table as ordered column/value rows.
    ///
    /// Mapped columns are converted by their field's handler and reported
    /// under their declared spelling; any other column passes through.
    pub fn query_dynamic<E: Entity>(
        &self,
        conn: &dyn Connection,
        filter: Option<&QueryGroup>,
        options: &SelectOptions,
    ) -> Result<Vec<Row>> {
        let map = self.resolver.resolve::<E>()?;
        let statement = self.cached::<E, _, _>(&map, StatementKind::Select, filter, options, || {
            self.builder.select(&map, filter, options)
        })?;
        let rows = self.fetch(conn, &map, &statement)?;
        let accessor = self.accessors.dynamic::<E>(&map)?;
        rows.iter().map(|row| accessor.from_row(row)).collect()
    }

    /// Run several selects in one round trip.
    pub fn query_multiple(&self, conn: &dyn Connection, multi: &MultiQuery) -> Result<MultiResult> {
        let maps = multi
            .selects
            .iter()
            .map(|select| (select.resolve)(&self.resolver))
            .collect::<Result<Vec<_>>>()?;
        let requests: Vec<SelectRequest<'_>> = multi
            .selects
            .iter()
            .zip(&maps)
            .map(|(select, map)| SelectRequest {
                map,
                filter: select.filter.as_ref(),
                options: &select.options,
            })
            .collect();
        let statement = self.builder.multi_select(&requests)?;

        debug!(
            kind = statement.kind.as_str(),
            selects = requests.len(),
            parameters = statement.parameters.len(),
            "executing statement"
        );
        let sets = conn.query_multiple(&statement)?;
        if sets.len() != multi.len() {
            return Err(Error::Driver(
                format!(
                    "expected {} result sets, connection returned {}",
                    multi.len(),
                    sets.len()
                )
                .into(),
            ));
        }

        let mut result = MultiResult::new(Arc::clone(&self.accessors));
        for ((select, map), rows) in multi.selects.iter().zip(maps).zip(sets) {
            result.push(select, map, rows);
        }
        Ok(result)
    }

    /// Number of rows matching `filter`.
    pub fn count<E: Entity>(&self, conn: &dyn Connection, filter: Option<&QueryGroup>) -> Result<u64> {
        let value = self.aggregate::<E>(conn, Aggregate::Count, None, filter)?;
        let count = convert::coerce(value.clone(), ScalarType::Int64)
            .map_err(|reason| Error::conversion(Aggregate::Count.alias(), value.clone(), reason))?;
        count
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| Error::conversion(Aggregate::Count.alias(), value, "not a row count"))
    }

    /// True if any row matches `filter`.
    pub fn exists<E: Entity>(&self, conn: &dyn Connection, filter: Option<&QueryGroup>) -> Result<bool> {
        let map = self.resolver.resolve::<E>()?;
        let statement = self.cached::<E, _, _>(&map, StatementKind::Exists, filter, &(), || {
            self.builder.exists(&map, filter)
        })?;
        Ok(!self.fetch(conn, &map, &statement)?.is_empty())
    }

    /// Value of an aggregate function over the rows matching `filter`.
    ///
    /// The result is returned as the database reported it.
    pub fn aggregate<E: Entity>(
        &self,
        conn: &dyn Connection,
        function: Aggregate,
        field: Option<&str>,
        filter: Option<&QueryGroup>,
    ) -> Result<Value> {
        let map = self.resolver.resolve::<E>()?;
        let statement = self.cached::<E, _, _>(
            &map,
            StatementKind::Aggregate,
            filter,
            &(function, field),
            || self.builder.aggregate(&map, function, field, filter),
        )?;
        self.log(&map, &statement);
        conn.scalar(&statement)
    }

    // ----- Writes -----

    /// Insert one entity.
    ///
    /// When the table has an identity field, the generated value is written
    /// back into `entity` and returned. Otherwise the entity's key value is
    /// returned, or `Value::Null` if it has no key.
    pub fn insert<E: Entity>(&self, conn: &dyn Connection, entity: &mut E) -> Result<Value> {
        let map = self.resolver.resolve::<E>()?;
        let fields: Vec<&FieldMap> = map.insert_fields().collect();
        let writer = self.accessors.writer::<E>(&fields)?;
        let statement = self.builder.insert(&map, &fields, writer.to_params(entity)?)?;
        let reader = self.accessors.reader::<E>(&map)?;

        match statement.returning.as_deref() {
            Some(identity) => {
                self.log(&map, &statement);
                let raw = conn.scalar(&statement)?;
                if raw.is_null() {
                    return Err(Error::Driver(
                        format!("insert into '{}' returned no identity value", map.table()).into(),
                    ));
                }
                reader.write(entity, identity, raw.clone())?;
                Ok(raw)
            }
            None => {
                self.execute(conn, &map, &statement)?;
                match map.key() {
                    Some(key) => reader.read(entity, key.name()).unwrap_or(Ok(Value::Null)),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    /// Insert many entities in chunked multi-row statements.
    ///
    /// Generated identity values are not written back.
    pub fn insert_all<E: Entity>(&self, conn: &dyn Connection, entities: &[E]) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let fields: Vec<&FieldMap> = map.insert_fields().collect();
        let writer = self.accessors.writer::<E>(&fields)?;
        let rows = entities
            .iter()
            .map(|entity| writer.to_params(entity))
            .collect::<Result<Vec<_>>>()?;
        let statements = self
            .builder
            .batch_insert(&map, &fields, rows, self.config.batch_size)?;
        self.execute_all(conn, &map, &statements)
    }

    /// Update every non-key field of `entity`, matched by its key.
    pub fn update<E: Entity>(&self, conn: &dyn Connection, entity: &E) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let set: Vec<&FieldMap> = map.update_fields().collect();
        self.update_set(conn, &map, &set, entity)
    }

    /// Update only the named fields of `entity`, matched by its key.
    pub fn update_fields<E: Entity>(
        &self,
        conn: &dyn Connection,
        entity: &E,
        fields: &[&str],
    ) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let set = fields
            .iter()
            .map(|name| {
                let field = map.require_field(name)?;
                if map.is_key(name) || map.is_identity(name) {
                    return Err(Error::Mapping(format!(
                        "field '{name}' identifies the row and cannot be updated"
                    )));
                }
                Ok(field)
            })
            .collect::<Result<Vec<_>>>()?;
        self.update_set(conn, &map, &set, entity)
    }

    /// Update many entities by key, chunked.
    pub fn update_all<E: Entity>(&self, conn: &dyn Connection, entities: &[E]) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let set: Vec<&FieldMap> = map.update_fields().collect();
        let key = map.require_key("update")?;
        let writer = self.accessors.writer::<E>(&with_key(&set, key))?;
        let rows = entities
            .iter()
            .map(|entity| writer.to_params(entity).map(split_key))
            .collect::<Result<Vec<_>>>()?;
        let statements = self
            .builder
            .batch_update(&map, &set, rows, self.config.batch_size)?;
        self.execute_all(conn, &map, &statements)
    }

    /// Delete rows matching `filter`; `None` deletes every row.
    pub fn delete<E: Entity>(&self, conn: &dyn Connection, filter: Option<&QueryGroup>) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let statement = self.cached::<E, _, _>(&map, StatementKind::Delete, filter, &(), || {
            self.builder.delete(&map, filter)
        })?;
        self.execute(conn, &map, &statement)
    }

    /// Delete the row whose key field equals `key`.
    pub fn delete_by_key<E: Entity>(&self, conn: &dyn Connection, key: impl Into<Value>) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let filter = key_filter(&map, "delete by key", key.into())?;
        self.delete::<E>(conn, Some(&filter))
    }

    /// Insert `entity`, or update the row matching it on `qualifiers`.
    ///
    /// Qualifiers default to the entity's key field. When the identity is a
    /// qualifier it is never inserted; the identity of the merged row is
    /// written back to `entity` where the dialect can report it.
    pub fn merge<E: Entity>(
        &self,
        conn: &dyn Connection,
        entity: &mut E,
        qualifiers: Option<&[&str]>,
    ) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let (fields, qualifiers) = merge_fields(&map, qualifiers)?;
        let writer = self.accessors.writer::<E>(&fields)?;
        let statement = self
            .builder
            .merge(&map, &fields, &qualifiers, writer.to_params(entity)?)?;

        let Some(identity) = statement.returning.as_deref() else {
            return self.execute(conn, &map, &statement);
        };
        self.log(&map, &statement);
        let raw = conn.scalar(&statement)?;
        if raw.is_null() {
            // Matched with nothing to update.
            return Ok(0);
        }
        let reader = self.accessors.reader::<E>(&map)?;
        reader.write(entity, identity, raw)?;
        Ok(1)
    }

    /// [`merge`](Self::merge) many entities, chunked.
    pub fn merge_all<E: Entity>(
        &self,
        conn: &dyn Connection,
        entities: &[E],
        qualifiers: Option<&[&str]>,
    ) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let (fields, qualifiers) = merge_fields(&map, qualifiers)?;
        let writer = self.accessors.writer::<E>(&fields)?;
        let rows = entities
            .iter()
            .map(|entity| writer.to_params(entity))
            .collect::<Result<Vec<_>>>()?;
        let statements =
            self.builder
                .batch_merge(&map, &fields, &qualifiers, rows, self.config.batch_size)?;
        self.execute_all(conn, &map, &statements)
    }

    /// Remove every row of `E`'s table.
    pub fn truncate<E: Entity>(&self, conn: &dyn Connection) -> Result<u64> {
        let map = self.resolver.resolve::<E>()?;
        let statement = self.builder.truncate(&map)?;
        self.execute(conn, &map, &statement)
    }

    // ----- Internals -----

    fn update_set<E: Entity>(
        &self,
        conn: &dyn Connection,
        map: &ClassMap,
        set: &[&FieldMap],
        entity: &E,
    ) -> Result<u64> {
        let key = map.require_key("update")?;
        let writer = self.accessors.writer::<E>(&with_key(set, key))?;
        let (values, key_value) = split_key(writer.to_params(entity)?);
        let statement = self.builder.update(map, set, values, key_value)?;
        self.execute(conn, map, &statement)
    }

    /// Build through the command cache when it is enabled.
    fn cached<E, O, F>(
        &self,
        map: &ClassMap,
        kind: StatementKind,
        filter: Option<&QueryGroup>,
        options: &O,
        build: F,
    ) -> Result<Statement>
    where
        E: Entity,
        O: Hash + ?Sized,
        F: FnOnce() -> Result<Statement>,
    {
        if !self.config.enable_command_cache {
            return build();
        }
        let key = CommandKey::new(TypeId::of::<E>(), kind, filter, options);
        let values = self.builder.filter_values(map, filter)?;
        self.commands.get_or_build(key, values, build)
    }

    fn materialize<E: Entity>(&self, map: &ClassMap, rows: &[Row]) -> Result<Vec<E>> {
        let reader = self.accessors.reader::<E>(map)?;
        rows.iter().map(|row| reader.from_row(row)).collect()
    }

    fn fetch(&self, conn: &dyn Connection, map: &ClassMap, statement: &Statement) -> Result<Vec<Row>> {
        self.log(map, statement);
        conn.query(statement)
    }

    fn execute(&self, conn: &dyn Connection, map: &ClassMap, statement: &Statement) -> Result<u64> {
        self.log(map, statement);
        conn.execute(statement)
    }

    fn execute_all(&self, conn: &dyn Connection, map: &ClassMap, statements: &[Statement]) -> Result<u64> {
        let mut affected = 0;
        for statement in statements {
            affected += self.execute(conn, map, statement)?;
        }
        Ok(affected)
    }

    fn log(&self, map: &ClassMap, statement: &Statement) {
        debug!(
            kind = statement.kind.as_str(),
            table = map.table(),
            parameters = statement.parameters.len(),
            rows = statement.rows,
            "executing statement"
        );
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dialect", &self.builder.dialect().name())
            .field("resolved", &self.resolver.len())
            .field("accessors", &self.accessors.len())
            .field("config", &self.config)
            .finish()
    }
}

fn key_filter(map: &ClassMap, operation: &str, key: Value) -> Result<QueryGroup> {
    let field = map.require_key(operation)?;
    Ok(QueryField::eq(field.name(), key)?.into())
}

fn with_key<'a>(set: &[&'a FieldMap], key: &'a FieldMap) -> Vec<&'a FieldMap> {
    let mut fields = set.to_vec();
    fields.push(key);
    fields
}

/// Split writer output over `set + [key]` into set values and the key value.
fn split_key(mut values: Vec<Value>) -> (Vec<Value>, Value) {
    let key = values.pop().unwrap_or(Value::Null);
    (values, key)
}

/// Merged fields and qualifiers.
///
/// The identity column is written only when it is a qualifier; otherwise
/// the database generates it.
fn merge_fields<'a>(
    map: &'a ClassMap,
    qualifiers: Option<&[&str]>,
) -> Result<(Vec<&'a FieldMap>, Vec<&'a FieldMap>)> {
    let qualifiers: Vec<&FieldMap> = match qualifiers {
        Some(names) => names
            .iter()
            .map(|name| map.require_field(name))
            .collect::<Result<_>>()?,
        None => vec![map.require_key("merge")?],
    };
    let fields = map
        .fields()
        .iter()
        .filter(|f| !map.is_identity(f.name()) || qualifiers.iter().any(|q| q.name() == f.name()))
        .collect();
    Ok((fields, qualifiers))
}
