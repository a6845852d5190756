//! Cache error types

use std::time::Duration;

use redis::RedisError;

/// Which store a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Authoritative version counter
    Version,
    /// Key-value tier (L1)
    Ephemeral,
    /// Relational JSON cache table (L2)
    Persistent,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Version => f.write_str("version"),
            Tier::Ephemeral => f.write_str("ephemeral"),
            Tier::Persistent => f.write_str("persistent"),
        }
    }
}

/// Cache-related errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt payload for id {id}: {reason}")]
    CorruptPayload { id: i64, reason: String },

    #[error("{tier} tier timed out after {after:?}")]
    Timeout { tier: Tier, after: Duration },

    #[error("Recompute failed for id {id}: {source}")]
    Recompute {
        id: i64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Connectivity and timeout failures that a slower tier can absorb.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CacheError::Redis(_) | CacheError::Database(_) | CacheError::Timeout { .. }
        )
    }
}
