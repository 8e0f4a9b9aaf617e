//! Command-text cache.
//!
//! Generated SQL depends only on the entity mapping, the statement kind,
//! the predicate's shape and the statement options, never on the literal
//! predicate values. The text is therefore cached under a key built from
//! those inputs and rebound with fresh values on a hit.

use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::trace;

use tablemap_proto::{QueryFingerprint, QueryGroup, Value};

use super::CacheStats;
use crate::error::{Error, Result};
use crate::statement::{Parameter, Statement, StatementKind};

/// Cache key for generated command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandKey {
    entity: TypeId,
    kind: StatementKind,
    fingerprint: QueryFingerprint,
    options: u64,
}

impl CommandKey {
    /// Key for a statement of `kind` over entity `entity`.
    ///
    /// `options` covers every non-predicate input that changes the text,
    /// such as ordering, row limits, projections or aggregate functions.
    pub fn new<O: Hash + ?Sized>(
        entity: TypeId,
        kind: StatementKind,
        filter: Option<&QueryGroup>,
        options: &O,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        options.hash(&mut hasher);
        Self {
            entity,
            kind,
            fingerprint: QueryFingerprint::from_optional(filter),
            options: hasher.finish(),
        }
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }
}

/// Cached command text with metadata.
#[derive(Debug)]
pub struct CachedCommand {
    kind: StatementKind,
    sql: String,
    names: Vec<String>,
    /// When this command was cached.
    created_at: Instant,
    hit_count: AtomicU64,
}

impl CachedCommand {
    pub fn from_statement(statement: &Statement) -> Self {
        Self {
            kind: statement.kind,
            sql: statement.sql.clone(),
            names: statement.parameters.iter().map(|p| p.name.clone()).collect(),
            created_at: Instant::now(),
            hit_count: AtomicU64::new(0),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter names in binding order.
    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Increment the hit count and return the new value.
    pub fn record_hit(&self) -> u64 {
        self.hit_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get the current hit count.
    pub fn hits(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    /// Rebuild the statement with `values`, given in binding order.
    pub fn bind(&self, values: Vec<Value>) -> Result<Statement> {
        if values.len() != self.names.len() {
            return Err(Error::Configuration(format!(
                "cached command binds {} parameters, got {} values",
                self.names.len(),
                values.len()
            )));
        }
        let parameters = self
            .names
            .iter()
            .cloned()
            .zip(values)
            .map(|(name, value)| Parameter { name, value })
            .collect();
        Ok(Statement::new(self.kind, self.sql.clone(), parameters))
    }
}

/// Command cache with least-used eviction.
pub struct CommandCache {
    cache: RwLock<HashMap<CommandKey, Arc<CachedCommand>>>,
    max_entries: usize,
    stats: CacheStats,
}

impl CommandCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached command.
    pub fn get(&self, key: &CommandKey) -> Option<Arc<CachedCommand>> {
        let guard = self.cache.read();
        match guard.get(key) {
            Some(cached) => {
                cached.record_hit();
                self.stats.record_hit();
                trace!(kind = key.kind.as_str(), "command cache hit");
                Some(Arc::clone(cached))
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Cache the text of `statement` under `key`.
    ///
    /// If the cache is full, evicts the least-used entry.
    pub fn insert(&self, key: CommandKey, statement: &Statement) -> Arc<CachedCommand> {
        let cached = Arc::new(CachedCommand::from_statement(statement));
        let mut guard = self.cache.write();

        if guard.len() >= self.max_entries && !guard.contains_key(&key) {
            self.evict_least_used(&mut guard);
        }

        guard.insert(key, Arc::clone(&cached));
        cached
    }

    /// Return the statement for `key`, rebinding cached text with `values`
    /// or building and caching it on a miss.
    pub fn get_or_build<F>(&self, key: CommandKey, values: Vec<Value>, build: F) -> Result<Statement>
    where
        F: FnOnce() -> Result<Statement>,
    {
        if let Some(cached) = self.get(&key) {
            return cached.bind(values);
        }
        let statement = build()?;
        self.insert(key, &statement);
        Ok(statement)
    }

    fn evict_least_used(&self, cache: &mut HashMap<CommandKey, Arc<CachedCommand>>) {
        let evict_key = cache
            .iter()
            .min_by_key(|(_, v)| v.hits())
            .map(|(k, _)| *k);

        if let Some(key) = evict_key {
            cache.remove(&key);
            self.stats.record_eviction();
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablemap_proto::QueryField;

    struct User;
    struct Post;

    fn statement(sql: &str, params: &[(&str, Value)]) -> Statement {
        Statement::new(
            StatementKind::Select,
            sql.to_string(),
            params
                .iter()
                .map(|(name, value)| Parameter {
                    name: name.to_string(),
                    value: value.clone(),
                })
                .collect(),
        )
    }

    fn key_for<E: 'static>(filter: &QueryGroup) -> CommandKey {
        CommandKey::new(TypeId::of::<E>(), StatementKind::Select, Some(filter), &())
    }

    #[test]
    fn test_key_ignores_values() {
        let a = QueryGroup::from(QueryField::eq("Name", "Alice").unwrap());
        let b = QueryGroup::from(QueryField::eq("Name", "Bob").unwrap());
        assert_eq!(key_for::<User>(&a), key_for::<User>(&b));
    }

    #[test]
    fn test_key_distinguishes_entity_field_and_options() {
        let a = QueryGroup::from(QueryField::eq("Name", "Alice").unwrap());
        let b = QueryGroup::from(QueryField::eq("Email", "Alice").unwrap());
        assert_ne!(key_for::<User>(&a), key_for::<Post>(&a));
        assert_ne!(key_for::<User>(&a), key_for::<User>(&b));

        let top1 = CommandKey::new(TypeId::of::<User>(), StatementKind::Select, Some(&a), &Some(1u64));
        let top2 = CommandKey::new(TypeId::of::<User>(), StatementKind::Select, Some(&a), &Some(2u64));
        assert_ne!(top1, top2);
    }

    #[test]
    fn test_key_distinguishes_in_list_length() {
        let two = QueryGroup::from(QueryField::in_values("Id", [1, 2]).unwrap());
        let three = QueryGroup::from(QueryField::in_values("Id", [1, 2, 3]).unwrap());
        assert_ne!(key_for::<User>(&two), key_for::<User>(&three));
    }

    #[test]
    fn test_get_or_build_rebinds_on_hit() {
        let cache = CommandCache::new(8);
        let filter = QueryGroup::from(QueryField::eq("Name", "Alice").unwrap());
        let key = key_for::<User>(&filter);

        let first = cache
            .get_or_build(key, vec!["Alice".into()], || {
                Ok(statement("SELECT 1 WHERE Name = @Name", &[("Name", "Alice".into())]))
            })
            .unwrap();
        let second = cache
            .get_or_build(key, vec!["Bob".into()], || panic!("text should be cached"))
            .unwrap();

        assert_eq!(first.sql, second.sql);
        assert_eq!(second.parameter("Name"), Some(&Value::from("Bob")));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_bind_rejects_wrong_arity() {
        let cached = CachedCommand::from_statement(&statement("x", &[("A", Value::Null)]));
        assert!(matches!(cached.bind(vec![]), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_evicts_least_used() {
        let cache = CommandCache::new(2);
        let groups: Vec<QueryGroup> = ["A", "B", "C"]
            .iter()
            .map(|f| QueryGroup::from(QueryField::eq(*f, 1).unwrap()))
            .collect();
        let keys: Vec<CommandKey> = groups.iter().map(key_for::<User>).collect();

        cache.insert(keys[0], &statement("a", &[]));
        cache.insert(keys[1], &statement("b", &[]));
        cache.get(&keys[0]);
        cache.insert(keys[2], &statement("c", &[]));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&keys[0]).is_some());
        assert!(cache.get(&keys[1]).is_none());
        assert_eq!(cache.stats().evictions(), 1);
    }
}
