//! Shape fingerprints for query expressions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::query::{QueryField, QueryGroup, QueryNode};

/// Structural fingerprint of a [`QueryGroup`].
///
/// The fingerprint is computed from the expression shape, not the literal
/// values. Two groups with the same fields, operators, nesting and operand
/// counts share a fingerprint, so the SQL text generated for one can be
/// rebound with the values of the other. The operand count is part of the
/// shape because `In` lists expand into one placeholder per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryFingerprint {
    hash: u64,
}

impl QueryFingerprint {
    /// Fingerprint of a group.
    pub fn from_group(group: &QueryGroup) -> Self {
        let mut hasher = DefaultHasher::new();
        Self::hash_group_structure(group, &mut hasher);
        Self {
            hash: hasher.finish(),
        }
    }

    /// Fingerprint of a possibly-absent predicate; `None` and an empty group agree.
    pub fn from_optional(group: Option<&QueryGroup>) -> Self {
        match group {
            Some(group) => Self::from_group(group),
            None => Self::from_group(&QueryGroup::all()),
        }
    }

    /// Raw 64-bit value.
    pub fn value(&self) -> u64 {
        self.hash
    }

    fn hash_group_structure<H: Hasher>(group: &QueryGroup, hasher: &mut H) {
        group.conjunction().hash(hasher);
        group.is_negated().hash(hasher);
        group.children().len().hash(hasher);

        for child in group.children() {
            std::mem::discriminant(child).hash(hasher);
            match child {
                QueryNode::Field(field) => Self::hash_field_structure(field, hasher),
                QueryNode::Group(inner) => Self::hash_group_structure(inner, hasher),
            }
        }
    }

    fn hash_field_structure<H: Hasher>(field: &QueryField, hasher: &mut H) {
        field.field().name().hash(hasher);
        field.operator().hash(hasher);
        // Hash cardinality, not actual values
        field.operand().len().hash(hasher);
    }
}
