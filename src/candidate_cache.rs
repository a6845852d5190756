//! Candidate JSON cache
//!
//! Wires the read-through protocol to concrete stores for the candidate
//! entity:
//! - versions from `candidate.data_version` (Postgres)
//! - L2 rows in `candidate_json_cache` (Postgres)
//! - L1 under `candidate-json:<id>:v:<version>` (Redis, or Moka in-process)
//!
//! The JSON itself comes from a caller-supplied [`Recomputer`].

use std::collections::HashSet;

use sqlx::PgPool;
use tracing::debug;

use crate::{
    BatchResult, CacheConfig, CacheError, CacheOrchestrator, EphemeralStore, LocalStore,
    PgPersistentCache, PgVersionSource, Recomputer, RedisStore,
};

/// Candidate JSON cache over Postgres plus an ephemeral store (Redis by default)
pub struct CandidateJsonCache<R: Recomputer, S: EphemeralStore = RedisStore> {
    inner: CacheOrchestrator<PgVersionSource, PgPersistentCache, S, R>,
}

impl<R: Recomputer, S: EphemeralStore> Clone for CandidateJsonCache<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Recomputer> CandidateJsonCache<R, RedisStore> {
    /// Create a cache using Redis for the ephemeral tier.
    pub async fn new(
        pool: PgPool,
        redis_client: redis::Client,
        recomputer: R,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        let store = RedisStore::new(redis_client).await?;
        Self::with_store(pool, store, recomputer, config)
    }
}

impl<R: Recomputer> CandidateJsonCache<R, LocalStore> {
    /// Create a cache using an in-process Moka store for the ephemeral tier.
    pub fn local(pool: PgPool, recomputer: R, config: CacheConfig) -> Result<Self, CacheError> {
        let store = LocalStore::from_config(&config);
        Self::with_store(pool, store, recomputer, config)
    }
}

impl<R: Recomputer, S: EphemeralStore> CandidateJsonCache<R, S> {
    /// Create a cache over any ephemeral store.
    pub fn with_store(
        pool: PgPool,
        store: S,
        recomputer: R,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        let versions = PgVersionSource::new(pool.clone(), &config.tables)?;
        let persistent = PgPersistentCache::new(pool, &config.tables)?;
        debug!(
            "Candidate JSON cache ready (namespace: {}, ttl: {:?})",
            config.namespace, config.ephemeral_ttl
        );
        Ok(Self {
            inner: CacheOrchestrator::new(versions, persistent, store, recomputer, config),
        })
    }

    /// Create the cache table if it is missing.
    pub async fn ensure_schema(&self) -> Result<(), CacheError> {
        self.inner.persistent().ensure_table().await
    }

    /// Current JSON for each candidate id.
    pub async fn batch_get(&self, ids: &HashSet<i64>) -> Result<BatchResult, CacheError> {
        self.inner.batch_get(ids).await
    }

    /// Current JSON for one candidate, `None` if it does not exist.
    pub async fn get(&self, id: i64) -> Result<Option<String>, CacheError> {
        self.inner.get(id).await
    }

    /// Recompute and store candidates regardless of cache state.
    pub async fn refresh(&self, ids: &HashSet<i64>) -> Result<BatchResult, CacheError> {
        self.inner.refresh(ids).await
    }

    /// Versioned L1 key for a candidate.
    pub fn key(&self, id: i64, version: i64) -> String {
        self.inner.ephemeral().key(id, version)
    }

    pub fn config(&self) -> &CacheConfig {
        self.inner.config()
    }
}
