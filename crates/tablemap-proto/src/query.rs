//! Query expression model.
//!
//! A predicate is a tree of [`QueryGroup`]s whose leaves are [`QueryField`]s.
//! Constructors validate operator/value arity immediately, so a
//! `QueryField` that exists is well-formed. Groups preserve child order: the
//! statement builder walks them pre-order, left to right, and assigns
//! placeholders in exactly that order.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::fingerprint::QueryFingerprint;
use crate::types::FieldType;
use crate::value::Value;

/// A named, optionally typed reference to an entity field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    name: String,
    declared_type: Option<FieldType>,
}

impl Field {
    /// Create a typed field reference.
    pub fn new(name: impl Into<String>, declared_type: FieldType) -> Self {
        Self {
            name: name.into(),
            declared_type: Some(declared_type),
        }
    }

    /// Create an untyped field reference; its type is taken from the entity mapping.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: None,
        }
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type, if known.
    pub fn declared_type(&self) -> Option<&FieldType> {
        self.declared_type.as_ref()
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Field::named(name)
    }
}

impl From<String> for Field {
    fn from(name: String) -> Self {
        Field::named(name)
    }
}

/// Comparison operators for a [`QueryField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
}

/// Number of values an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No value (IS NULL / IS NOT NULL).
    None,
    /// Exactly one value.
    One,
    /// Exactly two values (BETWEEN).
    Two,
    /// One or more values (IN).
    Many,
}

impl Operator {
    /// The value arity this operator requires.
    pub fn arity(&self) -> Arity {
        match self {
            Operator::IsNull | Operator::IsNotNull => Arity::None,
            Operator::Between | Operator::NotBetween => Arity::Two,
            Operator::In | Operator::NotIn => Arity::Many,
            _ => Arity::One,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How sibling nodes in a [`QueryGroup`] combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

/// The value side of a [`QueryField`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// No value (IS NULL / IS NOT NULL).
    Absent,
    /// A single value.
    Single(Value),
    /// A lower and upper bound.
    Range(Value, Value),
    /// A list of values, expanded into one placeholder each.
    List(Vec<Value>),
}

impl Operand {
    /// Number of values carried.
    pub fn len(&self) -> usize {
        match self {
            Operand::Absent => 0,
            Operand::Single(_) => 1,
            Operand::Range(_, _) => 2,
            Operand::List(values) => values.len(),
        }
    }

    /// True if no value is carried.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over the carried values in order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        let slice: Vec<&Value> = match self {
            Operand::Absent => Vec::new(),
            Operand::Single(v) => vec![v],
            Operand::Range(lo, hi) => vec![lo, hi],
            Operand::List(values) => values.iter().collect(),
        };
        slice.into_iter()
    }
}

/// A leaf predicate: `field operator value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryField {
    field: Field,
    operator: Operator,
    operand: Operand,
}

impl QueryField {
    /// Create a predicate, validating the operand against the operator.
    ///
    /// A one-element list is accepted for `In`/`NotIn` as a single value is,
    /// and a two-element list is accepted for `Between`/`NotBetween`.
    pub fn new(
        field: impl Into<Field>,
        operator: Operator,
        operand: Operand,
    ) -> Result<Self, Error> {
        let field = field.into();
        let operand = normalize(operator, operand);
        let query_field = Self {
            field,
            operator,
            operand,
        };
        query_field.validate()?;
        Ok(query_field)
    }

    /// `field = value`
    pub fn eq(field: impl Into<Field>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::new(field, Operator::Equal, Operand::Single(value.into()))
    }

    /// `field <> value`
    pub fn ne(field: impl Into<Field>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::new(field, Operator::NotEqual, Operand::Single(value.into()))
    }

    /// `field < value`
    pub fn lt(field: impl Into<Field>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::new(field, Operator::LessThan, Operand::Single(value.into()))
    }

    /// `field <= value`
    pub fn le(field: impl Into<Field>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::new(field, Operator::LessThanOrEqual, Operand::Single(value.into()))
    }

    /// `field > value`
    pub fn gt(field: impl Into<Field>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::new(field, Operator::GreaterThan, Operand::Single(value.into()))
    }

    /// `field >= value`
    pub fn ge(field: impl Into<Field>, value: impl Into<Value>) -> Result<Self, Error> {
        Self::new(
            field,
            Operator::GreaterThanOrEqual,
            Operand::Single(value.into()),
        )
    }

    /// `field LIKE pattern`
    pub fn like(field: impl Into<Field>, pattern: impl Into<String>) -> Result<Self, Error> {
        Self::new(field, Operator::Like, Operand::Single(Value::String(pattern.into())))
    }

    /// `field NOT LIKE pattern`
    pub fn not_like(field: impl Into<Field>, pattern: impl Into<String>) -> Result<Self, Error> {
        Self::new(
            field,
            Operator::NotLike,
            Operand::Single(Value::String(pattern.into())),
        )
    }

    /// `field IN (values...)`
    pub fn in_values<I, V>(field: impl Into<Field>, values: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        Self::new(field, Operator::In, Operand::List(values))
    }

    /// `field NOT IN (values...)`
    pub fn not_in<I, V>(field: impl Into<Field>, values: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        Self::new(field, Operator::NotIn, Operand::List(values))
    }

    /// `field BETWEEN low AND high`
    pub fn between(
        field: impl Into<Field>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<Self, Error> {
        Self::new(field, Operator::Between, Operand::Range(low.into(), high.into()))
    }

    /// `field NOT BETWEEN low AND high`
    pub fn not_between(
        field: impl Into<Field>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> Result<Self, Error> {
        Self::new(
            field,
            Operator::NotBetween,
            Operand::Range(low.into(), high.into()),
        )
    }

    /// `field IS NULL`
    pub fn is_null(field: impl Into<Field>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::IsNull,
            operand: Operand::Absent,
        }
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(field: impl Into<Field>) -> Self {
        Self {
            field: field.into(),
            operator: Operator::IsNotNull,
            operand: Operand::Absent,
        }
    }

    /// The referenced field.
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// The comparison operator.
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The operand.
    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Check the operand against the operator's contract.
    ///
    /// Values that arrive through deserialization bypass the constructors,
    /// so the statement builder calls this again before rendering.
    pub fn validate(&self) -> Result<(), Error> {
        if self.field.name.trim().is_empty() {
            return Err(Error::InvalidField(self.field.name.clone()));
        }

        let operator = self.operator;
        let actual = self.operand.len();
        let arity_ok = match (operator.arity(), &self.operand) {
            (Arity::None, Operand::Absent) => true,
            (Arity::One, Operand::Single(_)) => true,
            (Arity::Two, Operand::Range(_, _)) => true,
            (Arity::Many, Operand::List(values)) => !values.is_empty(),
            _ => false,
        };
        if !arity_ok {
            let expected = match operator.arity() {
                Arity::None => "no value",
                Arity::One => "exactly one value",
                Arity::Two => "exactly two values",
                Arity::Many => "one or more values",
            };
            return Err(Error::Arity {
                operator,
                expected,
                actual,
            });
        }

        if self.operand.values().any(Value::is_null) {
            return Err(Error::NullComparison {
                field: self.field.name.clone(),
                operator,
            });
        }

        Ok(())
    }
}

fn normalize(operator: Operator, operand: Operand) -> Operand {
    match (operator.arity(), operand) {
        (Arity::Many, Operand::Single(value)) => Operand::List(vec![value]),
        (Arity::Two, Operand::List(mut values)) if values.len() == 2 => {
            let high = values.pop().unwrap_or(Value::Null);
            let low = values.pop().unwrap_or(Value::Null);
            Operand::Range(low, high)
        }
        (_, operand) => operand,
    }
}

/// A child of a [`QueryGroup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryNode {
    Field(QueryField),
    Group(QueryGroup),
}

impl From<QueryField> for QueryNode {
    fn from(field: QueryField) -> Self {
        QueryNode::Field(field)
    }
}

impl From<QueryGroup> for QueryNode {
    fn from(group: QueryGroup) -> Self {
        QueryNode::Group(group)
    }
}

/// A boolean combination of predicates.
///
/// An empty root group means "match all rows". Empty nested groups are
/// rejected by [`QueryGroup::validate`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryGroup {
    conjunction: Conjunction,
    negated: bool,
    children: Vec<QueryNode>,
}

impl QueryGroup {
    /// Create a group from its children.
    pub fn new(conjunction: Conjunction, children: Vec<QueryNode>) -> Self {
        Self {
            conjunction,
            negated: false,
            children,
        }
    }

    /// A group matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Combine children with AND.
    pub fn and<I, N>(children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<QueryNode>,
    {
        Self::new(
            Conjunction::And,
            children.into_iter().map(Into::into).collect(),
        )
    }

    /// Combine children with OR.
    pub fn or<I, N>(children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<QueryNode>,
    {
        Self::new(
            Conjunction::Or,
            children.into_iter().map(Into::into).collect(),
        )
    }

    /// Append a child node.
    pub fn with(mut self, child: impl Into<QueryNode>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Negate the whole group (`NOT (...)`).
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Conjunction joining the children.
    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    /// True if the group is negated.
    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Child nodes in declaration order.
    pub fn children(&self) -> &[QueryNode] {
        &self.children
    }

    /// True if the group has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterate over the leaf predicates, pre-order and left to right.
    ///
    /// The iterator is lazy; calling `flatten` again restarts the walk.
    pub fn flatten(&self) -> Flatten<'_> {
        Flatten {
            stack: vec![self.children.iter()],
        }
    }

    /// Validate every leaf and reject empty nested groups.
    pub fn validate(&self) -> Result<(), Error> {
        for child in &self.children {
            match child {
                QueryNode::Field(field) => field.validate()?,
                QueryNode::Group(group) => {
                    if group.is_empty() {
                        return Err(Error::EmptyGroup);
                    }
                    group.validate()?;
                }
            }
        }
        Ok(())
    }

    /// Shape fingerprint that ignores the literal values.
    pub fn fingerprint(&self) -> QueryFingerprint {
        QueryFingerprint::from_group(self)
    }
}

impl From<QueryField> for QueryGroup {
    fn from(field: QueryField) -> Self {
        QueryGroup::and([field])
    }
}

/// Pre-order iterator over the leaves of a [`QueryGroup`].
pub struct Flatten<'a> {
    stack: Vec<std::slice::Iter<'a, QueryNode>>,
}

impl<'a> Iterator for Flatten<'a> {
    type Item = &'a QueryField;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(QueryNode::Field(field)) => return Some(field),
                Some(QueryNode::Group(group)) => self.stack.push(group.children.iter()),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// An ordering term.
///
/// Ties are broken by the database's default row order; add a unique
/// tiebreaker field when deterministic ordering matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderField {
    /// Field name to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderField {
    /// Create ascending order.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create descending order.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_between_requires_two_values() {
        let err = QueryField::new("Age", Operator::Between, Operand::Single(Value::Int32(1)))
            .unwrap_err();
        assert!(matches!(err, Error::Arity { actual: 1, .. }));

        let err = QueryField::new(
            "Age",
            Operator::NotBetween,
            Operand::List(vec![1.into(), 2.into(), 3.into()]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Arity { actual: 3, .. }));

        let ok = QueryField::new(
            "Age",
            Operator::Between,
            Operand::List(vec![1.into(), 9.into()]),
        )
        .unwrap();
        assert_eq!(ok.operand(), &Operand::Range(Value::Int32(1), Value::Int32(9)));
    }

    #[test]
    fn test_in_requires_values() {
        let err = QueryField::in_values("Id", Vec::<i64>::new()).unwrap_err();
        assert!(matches!(err, Error::Arity { actual: 0, .. }));

        let err = QueryField::not_in("Id", Vec::<i64>::new()).unwrap_err();
        assert!(matches!(err, Error::Arity { .. }));

        let single = QueryField::new("Id", Operator::In, Operand::Single(5i64.into())).unwrap();
        assert_eq!(single.operand(), &Operand::List(vec![Value::Int64(5)]));
    }

    #[test]
    fn test_null_comparison_rejected() {
        let err = QueryField::eq("Name", Value::Null).unwrap_err();
        assert!(matches!(err, Error::NullComparison { .. }));

        let err = QueryField::in_values("Name", [Value::from("a"), Value::Null]).unwrap_err();
        assert!(matches!(err, Error::NullComparison { .. }));

        let ok = QueryField::is_null("Name");
        assert!(ok.validate().is_ok());
        assert!(ok.operand().is_empty());
    }

    #[test]
    fn test_is_null_rejects_value() {
        let err = QueryField::new("Name", Operator::IsNull, Operand::Single("x".into())).unwrap_err();
        assert!(matches!(err, Error::Arity { expected: "no value", .. }));
    }

    #[test]
    fn test_empty_field_name_rejected() {
        let err = QueryField::eq("  ", 1).unwrap_err();
        assert!(matches!(err, Error::InvalidField(_)));
    }

    #[test]
    fn test_flatten_pre_order() {
        let group = QueryGroup::and([
            QueryNode::from(QueryField::eq("A", 1).unwrap()),
            QueryGroup::or([
                QueryField::eq("B", 2).unwrap(),
                QueryField::eq("C", 3).unwrap(),
            ])
            .into(),
            QueryField::eq("D", 4).unwrap().into(),
        ]);

        let names: Vec<&str> = group.flatten().map(|f| f.field().name()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);

        // Restartable
        assert_eq!(group.flatten().count(), 4);
    }

    #[test]
    fn test_empty_nested_group_rejected() {
        let group = QueryGroup::and([QueryGroup::all()]);
        assert_eq!(group.validate(), Err(Error::EmptyGroup));

        // An empty root means match-all
        assert!(QueryGroup::all().validate().is_ok());
    }

    #[test]
    fn test_group_json_roundtrip() {
        let group = QueryGroup::or([
            QueryField::between("Age", 18, 65).unwrap(),
            QueryField::is_null("Age"),
        ])
        .negate();

        let json = serde_json::to_string(&group).unwrap();
        let back: QueryGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(group, back);
        assert!(back.is_negated());
    }
}
