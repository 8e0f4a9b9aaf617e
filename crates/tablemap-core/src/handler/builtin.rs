//! Built-in property handlers.

use std::fmt;

use tablemap_proto::Value;

use super::{HandlerError, PropertyHandler};

/// Passes values through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHandler;

impl PropertyHandler for IdentityHandler {
    fn to_db(&self, value: Value) -> Result<Value, HandlerError> {
        Ok(value)
    }

    fn from_db(&self, value: Value) -> Result<Value, HandlerError> {
        Ok(value)
    }
}

/// Maps enum variant names to arbitrary database literals.
///
/// ```
/// use tablemap_core::handler::{EnumMapHandler, PropertyHandler};
/// use tablemap_proto::Value;
///
/// let handler = EnumMapHandler::new([("West", "W"), ("East", "E")]);
/// assert_eq!(handler.to_db("West".into()).unwrap(), Value::from("W"));
/// assert_eq!(handler.from_db("E".into()).unwrap(), Value::from("East"));
/// ```
#[derive(Debug, Clone)]
pub struct EnumMapHandler {
    pairs: Vec<(String, Value)>,
}

impl EnumMapHandler {
    /// Create a handler from `(variant, database value)` pairs.
    pub fn new<I, S, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        Self {
            pairs: pairs
                .into_iter()
                .map(|(variant, db)| (variant.into(), db.into()))
                .collect(),
        }
    }
}

impl PropertyHandler for EnumMapHandler {
    fn to_db(&self, value: Value) -> Result<Value, HandlerError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(variant) => self
                .pairs
                .iter()
                .find(|(name, _)| *name == variant)
                .map(|(_, db)| db.clone())
                .ok_or_else(|| HandlerError::new(format!("unknown variant '{variant}'"))),
            other => Err(HandlerError::new(format!(
                "expected a variant name, got {}",
                other.type_name()
            ))),
        }
    }

    fn from_db(&self, value: Value) -> Result<Value, HandlerError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.pairs
            .iter()
            .find(|(_, db)| *db == value)
            .map(|(name, _)| Value::String(name.clone()))
            .ok_or_else(|| HandlerError::new(format!("no variant is stored as {value}")))
    }
}

/// Stores enum variants by their declaration ordinal.
#[derive(Debug, Clone)]
pub struct EnumOrdinalHandler {
    variants: Vec<String>,
}

impl EnumOrdinalHandler {
    pub fn new<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }
}

impl PropertyHandler for EnumOrdinalHandler {
    fn to_db(&self, value: Value) -> Result<Value, HandlerError> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(variant) => self
                .variants
                .iter()
                .position(|v| *v == variant)
                .map(|idx| Value::Int32(idx as i32))
                .ok_or_else(|| HandlerError::new(format!("unknown variant '{variant}'"))),
            other => Err(HandlerError::new(format!(
                "expected a variant name, got {}",
                other.type_name()
            ))),
        }
    }

    fn from_db(&self, value: Value) -> Result<Value, HandlerError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let ordinal = value
            .as_i64()
            .ok_or_else(|| HandlerError::new(format!("expected an ordinal, got {value}")))?;
        usize::try_from(ordinal)
            .ok()
            .and_then(|idx| self.variants.get(idx))
            .map(|name| Value::String(name.clone()))
            .ok_or_else(|| HandlerError::new(format!("ordinal {ordinal} is out of range")))
    }
}

type Convert = fn(Value) -> Result<Value, HandlerError>;

/// A handler made from two plain functions.
#[derive(Clone, Copy)]
pub struct FnHandler {
    name: &'static str,
    to_db: Convert,
    from_db: Convert,
}

impl FnHandler {
    pub fn new(name: &'static str, to_db: Convert, from_db: Convert) -> Self {
        Self {
            name,
            to_db,
            from_db,
        }
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

impl PropertyHandler for FnHandler {
    fn to_db(&self, value: Value) -> Result<Value, HandlerError> {
        (self.to_db)(value)
    }

    fn from_db(&self, value: Value) -> Result<Value, HandlerError> {
        (self.from_db)(value)
    }
}
