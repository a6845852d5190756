//! In-process ephemeral store
//!
//! A Moka-backed [`EphemeralStore`] for single-node deployments or when no
//! Redis is available. Versioned keys make it as safe as the Redis store:
//! nothing is ever invalidated, superseded keys fall out by capacity or TTL.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use crate::{CacheConfig, CacheError, EphemeralStore};

/// Moka-backed [`EphemeralStore`]
#[derive(Clone)]
pub struct LocalStore {
    cache: Cache<String, String>,
}

impl LocalStore {
    /// Create a store bounded to `max_capacity` entries.
    ///
    /// Moka applies one time-to-live to the whole cache, so `ttl` is fixed
    /// here rather than per write.
    pub fn new(max_capacity: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().max_capacity(max_capacity);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            cache: builder.build(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.local_max_capacity, config.ephemeral_ttl)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.cache.get(key).await.is_some()
    }
}

#[async_trait]
impl EphemeralStore for LocalStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.cache.get(key).await);
        }
        Ok(values)
    }

    async fn put_many(
        &self,
        entries: Vec<(String, String)>,
        _ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for (key, json) in entries {
            self.cache.insert(key, json).await;
        }
        Ok(())
    }
}
