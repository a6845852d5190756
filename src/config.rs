//! Cache configuration

use std::time::Duration;

use crate::CacheError;

/// Table and column names used by the Postgres-backed tiers
#[derive(Debug, Clone)]
pub struct TableNames {
    /// Authoritative entity table holding the version counter
    pub entity_table: String,
    /// Primary key column of the entity table
    pub entity_id_column: String,
    /// Monotonic version column of the entity table
    pub version_column: String,
    /// Persistent JSON cache table, keyed by `candidate_id`
    pub cache_table: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            entity_table: "candidate".to_owned(),
            entity_id_column: "id".to_owned(),
            version_column: "data_version".to_owned(),
            cache_table: "candidate_json_cache".to_owned(),
        }
    }
}

impl TableNames {
    /// Check that every name is a plain SQL identifier.
    ///
    /// Names are interpolated into SQL text, so anything beyond
    /// `[A-Za-z_][A-Za-z0-9_]*` is rejected.
    pub fn validate(&self) -> Result<(), CacheError> {
        for name in [
            &self.entity_table,
            &self.entity_id_column,
            &self.version_column,
            &self.cache_table,
        ] {
            if !is_identifier(name) {
                return Err(CacheError::Config(format!(
                    "invalid SQL identifier: {:?}",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Configuration for the versioned cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix of every ephemeral key: `<namespace>:<id>:v:<version>`
    pub namespace: String,
    /// Expiry for ephemeral entries. Memory hygiene only; `None` keeps entries
    /// until the store evicts them.
    pub ephemeral_ttl: Option<Duration>,
    /// Deadline for a single ephemeral tier call
    pub ephemeral_timeout: Option<Duration>,
    /// Deadline for a single persistent tier call
    pub persistent_timeout: Option<Duration>,
    /// Deadline for the authoritative version lookup
    pub version_timeout: Option<Duration>,
    /// Maximum ids per persistent cache query
    pub persistent_batch_size: usize,
    /// Maximum concurrent recomputations within one batch
    pub recompute_concurrency: usize,
    /// Reject payloads that do not parse as JSON
    pub validate_json: bool,
    /// Emit one summary line per batch at debug level
    pub log_batch_summary: bool,
    /// Maximum number of entries held by [`crate::LocalStore`]
    pub local_max_capacity: u64,
    /// Postgres table layout
    pub tables: TableNames,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "candidate-json".to_owned(),
            ephemeral_ttl: None,
            ephemeral_timeout: None,
            persistent_timeout: None,
            version_timeout: None,
            persistent_batch_size: 500,
            recompute_concurrency: 8,
            validate_json: true,
            log_batch_summary: false,
            local_max_capacity: 10_000,
            tables: TableNames::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ephemeral key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the ephemeral entry TTL.
    pub fn with_ephemeral_ttl(mut self, ttl: Duration) -> Self {
        self.ephemeral_ttl = Some(ttl);
        self
    }

    /// Set the ephemeral tier deadline.
    pub fn with_ephemeral_timeout(mut self, timeout: Duration) -> Self {
        self.ephemeral_timeout = Some(timeout);
        self
    }

    /// Set the persistent tier deadline.
    pub fn with_persistent_timeout(mut self, timeout: Duration) -> Self {
        self.persistent_timeout = Some(timeout);
        self
    }

    /// Set the version lookup deadline.
    pub fn with_version_timeout(mut self, timeout: Duration) -> Self {
        self.version_timeout = Some(timeout);
        self
    }

    /// Set the persistent query chunk size (minimum 1).
    pub fn with_persistent_batch_size(mut self, size: usize) -> Self {
        self.persistent_batch_size = size.max(1);
        self
    }

    /// Set the recompute concurrency (minimum 1).
    pub fn with_recompute_concurrency(mut self, concurrency: usize) -> Self {
        self.recompute_concurrency = concurrency.max(1);
        self
    }

    /// Enable or disable JSON validation of payloads.
    pub fn with_json_validation(mut self, enabled: bool) -> Self {
        self.validate_json = enabled;
        self
    }

    /// Enable or disable the per-batch summary log line.
    pub fn with_batch_summary(mut self, enabled: bool) -> Self {
        self.log_batch_summary = enabled;
        self
    }

    /// Set the local store capacity.
    pub fn with_local_capacity(mut self, capacity: u64) -> Self {
        self.local_max_capacity = capacity;
        self
    }

    /// Set the Postgres table layout.
    pub fn with_tables(mut self, tables: TableNames) -> Self {
        self.tables = tables;
        self
    }
}
