//! Value conversion policy.
//!
//! Drivers rarely return exactly the variant a field declares (SQLite, for
//! one, reports every integer as 64-bit). Values crossing the database
//! boundary are normalized with [`coerce`]:
//!
//! | from \ to        | rule                                                        |
//! |------------------|-------------------------------------------------------------|
//! | Int32 -> Int64   | widens                                                      |
//! | Int64 -> Int32   | narrows, overflow is an error                               |
//! | float -> integer | rounds to nearest, ties away from zero; NaN, infinity and overflow are errors |
//! | integer -> float | widens                                                      |
//! | text -> number   | parsed without locale; decimal text rounds into integers    |
//! | Bool <-> integer | `0`/`1`                                                     |
//! | any -> String    | canonical text form                                         |
//! | text/bytes -> Uuid | 32 hex digits (hyphens and braces allowed) or 16 bytes    |
//! | Timestamp <-> Int64 | microseconds since the epoch                             |
//!
//! Enum fields accept a variant name (exact, then ignoring ASCII case) or
//! an ordinal.

use tablemap_proto::{FieldType, ScalarType, Value};

use crate::catalog::FieldMap;
use crate::error::{Error, Result};

/// Convert `value` to the `target` scalar type. Null is returned unchanged.
pub fn coerce(value: Value, target: ScalarType) -> std::result::Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match target {
        ScalarType::Bool => to_bool(value).map(Value::Bool),
        ScalarType::Int32 => {
            let wide = to_i64(value)?;
            i32::try_from(wide)
                .map(Value::Int32)
                .map_err(|_| format!("{wide} overflows Int32"))
        }
        ScalarType::Int64 => to_i64(value).map(Value::Int64),
        ScalarType::Float32 => {
            let wide = to_f64(value)?;
            if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
                return Err(format!("{wide} overflows Float32"));
            }
            Ok(Value::Float32(wide as f32))
        }
        ScalarType::Float64 => to_f64(value).map(Value::Float64),
        ScalarType::String => to_text(value).map(Value::String),
        ScalarType::Bytes => match value {
            Value::Bytes(b) => Ok(Value::Bytes(b)),
            Value::Uuid(u) => Ok(Value::Bytes(u.to_vec())),
            Value::String(s) => Ok(Value::Bytes(s.into_bytes())),
            other => Err(unsupported(&other, target)),
        },
        ScalarType::Timestamp => match value {
            Value::Timestamp(t) => Ok(Value::Timestamp(t)),
            other => to_i64(other).map(Value::Timestamp),
        },
        ScalarType::Uuid => to_uuid(value).map(Value::Uuid),
    }
}

/// Convert `value` to a variant name of an enum with `variants`.
pub fn coerce_enum(value: Value, variants: &[String]) -> std::result::Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => {
            if let Some(name) = variants
                .iter()
                .find(|v| **v == s)
                .or_else(|| variants.iter().find(|v| v.eq_ignore_ascii_case(&s)))
            {
                return Ok(Value::String(name.clone()));
            }
            match s.trim().parse::<i64>() {
                Ok(ordinal) => variant_at(variants, ordinal),
                Err(_) => Err(format!("'{s}' is not a variant")),
            }
        }
        Value::Int32(_) | Value::Int64(_) | Value::Bool(_) => {
            let ordinal = to_i64(value)?;
            variant_at(variants, ordinal)
        }
        other => Err(format!("cannot read a variant from {}", other.type_name())),
    }
}

/// Convert a logical value into what is bound for `field`.
///
/// The field's handler runs first; its output is then normalized to the
/// field's database type. Enums without a handler stored in an integral
/// column are written by ordinal.
pub(crate) fn to_db(field: &FieldMap, value: Value) -> Result<Value> {
    let db = match field.handler() {
        Some(handler) => handler
            .to_db(value.clone())
            .map_err(|e| Error::conversion(field.name(), value, e.0))?,
        None => match (field.field_type(), value) {
            (FieldType::Enum { variants, .. } | FieldType::OptionalEnum { variants, .. }, v)
                if field.db_type().is_integral() =>
            {
                enum_ordinal(variants, v).map_err(|(v, reason)| {
                    Error::conversion(field.name(), v, reason)
                })?
            }
            (_, v) => v,
        },
    };
    if db.is_null() {
        return Ok(db);
    }
    coerce(db.clone(), field.db_type()).map_err(|reason| Error::conversion(field.name(), db, reason))
}

/// Convert a raw driver value into the logical value for `field`.
///
/// Null passes straight through for nullable fields without a handler.
/// A handler receives null and decides; a non-nullable field without one
/// rejects it.
pub(crate) fn from_db(field: &FieldMap, raw: Value) -> Result<Value> {
    let handler = field.handler();
    if raw.is_null() {
        return match handler {
            Some(handler) => handler
                .from_db(Value::Null)
                .map_err(|e| Error::conversion(field.name(), Value::Null, e.0)),
            None if field.is_nullable() => Ok(Value::Null),
            None => Err(Error::conversion(
                field.name(),
                Value::Null,
                "null read into a non-nullable field",
            )),
        };
    }

    let db = coerce(raw.clone(), field.db_type())
        .map_err(|reason| Error::conversion(field.name(), raw, reason))?;
    let logical = match handler {
        Some(handler) => handler
            .from_db(db.clone())
            .map_err(|e| Error::conversion(field.name(), db, e.0))?,
        None => db,
    };
    if logical.is_null() {
        return Ok(logical);
    }

    let converted = match field.field_type() {
        FieldType::Scalar(s) | FieldType::OptionalScalar(s) => coerce(logical.clone(), *s),
        FieldType::Enum { variants, .. } | FieldType::OptionalEnum { variants, .. } => {
            coerce_enum(logical.clone(), variants)
        }
    };
    converted.map_err(|reason| Error::conversion(field.name(), logical, reason))
}

fn enum_ordinal(variants: &[String], value: Value) -> std::result::Result<Value, (Value, String)> {
    match &value {
        Value::String(s) => variants
            .iter()
            .position(|v| v == s)
            .map(|idx| Value::Int64(idx as i64))
            .ok_or_else(|| (value.clone(), format!("'{s}' is not a variant"))),
        _ => Ok(value),
    }
}

fn variant_at(variants: &[String], ordinal: i64) -> std::result::Result<Value, String> {
    usize::try_from(ordinal)
        .ok()
        .and_then(|idx| variants.get(idx))
        .map(|name| Value::String(name.clone()))
        .ok_or_else(|| format!("ordinal {ordinal} is out of range"))
}

fn unsupported(value: &Value, target: ScalarType) -> String {
    format!("cannot convert {} to {target:?}", value.type_name())
}

fn to_bool(value: Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Int32(0) | Value::Int64(0) => Ok(false),
        Value::Int32(1) | Value::Int64(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(format!("'{s}' is not a boolean")),
        },
        other => Err(format!("{other} is not a boolean")),
    }
}

fn round_to_i64(f: f64) -> std::result::Result<i64, String> {
    if !f.is_finite() {
        return Err(format!("{f} has no integral value"));
    }
    let rounded = f.round();
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(format!("{f} overflows Int64"));
    }
    Ok(rounded as i64)
}

fn to_i64(value: Value) -> std::result::Result<i64, String> {
    match value {
        Value::Int32(i) => Ok(i64::from(i)),
        Value::Int64(i) | Value::Timestamp(i) => Ok(i),
        Value::Bool(b) => Ok(i64::from(b)),
        Value::Float32(f) => round_to_i64(f64::from(f)),
        Value::Float64(f) => round_to_i64(f),
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.parse::<i64>() {
                Ok(i) => Ok(i),
                Err(_) => match trimmed.parse::<f64>() {
                    Ok(f) => round_to_i64(f),
                    Err(_) => Err(format!("'{s}' is not a number")),
                },
            }
        }
        other => Err(unsupported(&other, ScalarType::Int64)),
    }
}

fn to_f64(value: Value) -> std::result::Result<f64, String> {
    match value {
        Value::Float64(f) => Ok(f),
        Value::Float32(f) => Ok(f64::from(f)),
        Value::Int32(i) => Ok(f64::from(i)),
        Value::Int64(i) => Ok(i as f64),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{s}' is not a number")),
        other => Err(unsupported(&other, ScalarType::Float64)),
    }
}

fn to_text(value: Value) -> std::result::Result<String, String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Bytes(b) => String::from_utf8(b).map_err(|_| "bytes are not valid UTF-8".into()),
        Value::Timestamp(t) => Ok(t.to_string()),
        other => Ok(other.to_string()),
    }
}

fn to_uuid(value: Value) -> std::result::Result<[u8; 16], String> {
    match value {
        Value::Uuid(u) => Ok(u),
        Value::Bytes(b) => <[u8; 16]>::try_from(b.as_slice())
            .map_err(|_| format!("{} bytes cannot form a UUID", b.len())),
        Value::String(s) => parse_uuid(&s).ok_or_else(|| format!("'{s}' is not a UUID")),
        other => Err(unsupported(&other, ScalarType::Uuid)),
    }
}

fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let digits: Vec<u8> = text
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .bytes()
        .filter(|b| *b != b'-')
        .collect();
    if digits.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, pair) in digits.chunks(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out[i] = (hi * 16 + lo) as u8;
    }
    Some(out)
}
