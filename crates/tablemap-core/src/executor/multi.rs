//! Several selects in one round trip.

use std::any::{type_name, TypeId};
use std::sync::Arc;

use tablemap_proto::QueryGroup;

use crate::accessor::AccessorCache;
use crate::catalog::{ClassMap, Entity, MetadataResolver};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::statement::SelectOptions;

type Resolve = fn(&MetadataResolver) -> Result<Arc<ClassMap>>;

pub(crate) struct MultiSelect {
    pub(crate) entity: TypeId,
    pub(crate) entity_type: &'static str,
    pub(crate) resolve: Resolve,
    pub(crate) filter: Option<QueryGroup>,
    pub(crate) options: SelectOptions,
}

/// An ordered list of selects, possibly over different entity types.
///
/// ```
/// use tablemap_core::executor::MultiQuery;
/// # use tablemap_core::catalog::{Entity, EntityDescriptor};
/// # use tablemap_core::statement::SelectOptions;
/// # #[derive(Default)] struct Person;
/// # impl Entity for Person {
/// #     fn describe() -> EntityDescriptor<Self> { EntityDescriptor::new("Person") }
/// # }
/// let multi = MultiQuery::new()
///     .select::<Person>(None, SelectOptions::new().top(10))
///     .select::<Person>(None, SelectOptions::new());
/// assert_eq!(multi.len(), 2);
/// ```
#[derive(Default)]
pub struct MultiQuery {
    pub(crate) selects: Vec<MultiSelect>,
}

impl MultiQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a select of `E`. Results come back in append order.
    pub fn select<E: Entity>(mut self, filter: Option<QueryGroup>, options: SelectOptions) -> Self {
        self.selects.push(MultiSelect {
            entity: TypeId::of::<E>(),
            entity_type: type_name::<E>(),
            resolve: MetadataResolver::resolve::<E>,
            filter,
            options,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.selects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selects.is_empty()
    }
}

struct ResultSet {
    entity: TypeId,
    entity_type: &'static str,
    map: Arc<ClassMap>,
    rows: Vec<Row>,
}

/// Result sets of a [`MultiQuery`], in select order.
pub struct MultiResult {
    sets: Vec<ResultSet>,
    accessors: Arc<AccessorCache>,
}

impl MultiResult {
    pub(crate) fn new(accessors: Arc<AccessorCache>) -> Self {
        Self {
            sets: Vec::new(),
            accessors,
        }
    }

    pub(crate) fn push(&mut self, select: &MultiSelect, map: Arc<ClassMap>, rows: Vec<Row>) {
        self.sets.push(ResultSet {
            entity: select.entity,
            entity_type: select.entity_type,
            map,
            rows,
        });
    }

    /// Materialize result set `index` as entities of type `E`.
    ///
    /// `E` must be the type the select at `index` was declared with.
    pub fn read<E: Entity>(&self, index: usize) -> Result<Vec<E>> {
        let set = self.set(index)?;
        if set.entity != TypeId::of::<E>() {
            return Err(Error::Mapping(format!(
                "result set {index} holds {}, not {}",
                set.entity_type,
                type_name::<E>()
            )));
        }
        let reader = self.accessors.reader::<E>(&set.map)?;
        set.rows.iter().map(|row| reader.from_row(row)).collect()
    }

    /// Raw rows of result set `index`.
    pub fn rows(&self, index: usize) -> Option<&[Row]> {
        self.sets.get(index).map(|set| set.rows.as_slice())
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    fn set(&self, index: usize) -> Result<&ResultSet> {
        self.sets.get(index).ok_or_else(|| {
            Error::Mapping(format!(
                "result set {index} does not exist; the query produced {}",
                self.sets.len()
            ))
        })
    }
}
