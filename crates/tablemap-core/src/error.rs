//! Core error types.

use thiserror::Error;

use tablemap_proto::Value;

/// Core errors.
///
/// Every variant is a local, synchronous failure. Nothing here is retried
/// internally; the caller decides whether to retry, surface or wrap.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed expression or statement request.
    #[error("validation error: {0}")]
    Validation(#[from] tablemap_proto::Error),

    /// Entity type cannot be mapped, or a referenced field is not mapped.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// A value cannot be converted by the applicable handler or policy.
    #[error("cannot convert {value} for field '{field}': {reason}")]
    Conversion {
        field: String,
        value: Value,
        reason: String,
    },

    /// The active dialect cannot express the requested construct.
    #[error("dialect '{dialect}' does not support {capability}")]
    DialectCapability {
        dialect: &'static str,
        capability: &'static str,
    },

    /// Configuration applied at the wrong time or with invalid content.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure reported by the external connection.
    #[error("driver error: {0}")]
    Driver(Box<dyn std::error::Error + Send + Sync>),

    /// JSON error while loading configuration.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wrap any driver error.
    pub fn driver<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Driver(Box::new(err))
    }

    /// Build a conversion error.
    pub fn conversion(field: impl Into<String>, value: Value, reason: impl Into<String>) -> Self {
        Error::Conversion {
            field: field.into(),
            value,
            reason: reason.into(),
        }
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
