//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for an [`Engine`](crate::executor::Engine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows per batch statement requested by the caller. The effective chunk
    /// size is further capped by the dialect's parameter ceiling.
    pub batch_size: usize,

    /// Maximum number of cached command texts.
    pub command_cache_capacity: usize,

    /// Whether select/count/delete command text is memoized by expression shape.
    pub enable_command_cache: bool,

    /// Maximum number of result-cache entries. None means unbounded.
    pub result_cache_capacity: Option<usize>,

    /// Expiration applied by `query_cached` when the caller passes no TTL.
    pub default_cache_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            command_cache_capacity: 512,
            enable_command_cache: true,
            result_cache_capacity: None,
            default_cache_ttl_secs: 180, // 3 minutes
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the batch size.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the command cache capacity.
    pub fn command_cache_capacity(mut self, capacity: usize) -> Self {
        self.command_cache_capacity = capacity;
        self
    }

    /// Enable or disable the command cache.
    pub fn enable_command_cache(mut self, enable: bool) -> Self {
        self.enable_command_cache = enable;
        self
    }

    /// Bound the result cache.
    pub fn result_cache_capacity(mut self, capacity: usize) -> Self {
        self.result_cache_capacity = Some(capacity);
        self
    }

    /// Set the default result-cache TTL.
    pub fn default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.default_cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Default result-cache TTL as a duration.
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_cache_ttl_secs)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be at least 1".into()));
        }
        if self.enable_command_cache && self.command_cache_capacity == 0 {
            return Err(Error::Configuration(
                "command_cache_capacity must be at least 1 when the command cache is enabled"
                    .into(),
            ));
        }
        if self.result_cache_capacity == Some(0) {
            return Err(Error::Configuration(
                "result_cache_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
