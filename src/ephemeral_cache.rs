//! Ephemeral versioned cache (L1)
//!
//! Keys embed the version: `<namespace>:<id>:v:<version>`. A version bump
//! changes which key is looked up, so entries never need deleting; superseded
//! keys are simply never read again and age out through the optional TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::CacheError;

/// JSON computed against a specific version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedJson {
    pub version: i64,
    pub json: String,
}

impl VersionedJson {
    pub fn new(version: i64, json: impl Into<String>) -> Self {
        Self {
            version,
            json: json.into(),
        }
    }
}

/// Build the versioned key for `id` at `version`.
pub fn versioned_key(namespace: &str, id: i64, version: i64) -> String {
    format!("{}:{}:v:{}", namespace, id, version)
}

/// Raw string key-value store behind the ephemeral tier.
///
/// There is deliberately no delete operation.
#[async_trait]
pub trait EphemeralStore: Send + Sync + 'static {
    /// Read all keys in one round trip, preserving order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError>;

    /// Write all entries. With a TTL every entry must carry its own expiry.
    async fn put_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;
}

/// Versioned-key view over an [`EphemeralStore`]
pub struct EphemeralCache<S: EphemeralStore> {
    store: Arc<S>,
    namespace: String,
    ttl: Option<Duration>,
}

impl<S: EphemeralStore> Clone for EphemeralCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            ttl: self.ttl,
        }
    }
}

impl<S: EphemeralStore> EphemeralCache<S> {
    pub fn new(store: S, namespace: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self {
            store: Arc::new(store),
            namespace: namespace.into(),
            ttl,
        }
    }

    /// Key for `id` at `version` in this cache's namespace.
    pub fn key(&self, id: i64, version: i64) -> String {
        versioned_key(&self.namespace, id, version)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Look up each id at its given version. Ids without an entry are omitted.
    pub async fn multi_get(
        &self,
        id_to_version: &HashMap<i64, i64>,
    ) -> Result<HashMap<i64, String>, CacheError> {
        if id_to_version.is_empty() {
            return Ok(HashMap::new());
        }

        let (ids, keys): (Vec<i64>, Vec<String>) = id_to_version
            .iter()
            .map(|(&id, &version)| (id, self.key(id, version)))
            .unzip();

        let values = self.store.get_many(&keys).await?;
        if values.len() != keys.len() {
            return Err(CacheError::Backend(
                format!(
                    "ephemeral store returned {} values for {} keys",
                    values.len(),
                    keys.len()
                )
                .into(),
            ));
        }

        let hits: HashMap<i64, String> = ids
            .into_iter()
            .zip(values)
            .filter_map(|(id, value)| value.map(|json| (id, json)))
            .collect();
        debug!("Ephemeral hits {}/{}", hits.len(), keys.len());
        Ok(hits)
    }

    /// Write one entry per row under its versioned key.
    pub async fn put_all(&self, rows: &HashMap<i64, VersionedJson>) -> Result<(), CacheError> {
        if rows.is_empty() {
            return Ok(());
        }
        let entries: Vec<(String, String)> = rows
            .iter()
            .map(|(&id, row)| (self.key(id, row.version), row.json.clone()))
            .collect();
        self.store.put_many(entries, self.ttl).await
    }
}

/// Redis-backed [`EphemeralStore`]
#[derive(Clone)]
pub struct RedisStore {
    redis: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect a managed (auto-reconnecting) connection.
    pub async fn new(redis_client: redis::Client) -> Result<Self, CacheError> {
        let redis = redis::aio::ConnectionManager::new(redis_client).await?;
        Ok(Self { redis })
    }

    pub fn from_connection(redis: redis::aio::ConnectionManager) -> Self {
        Self { redis }
    }
}

/// Expiry in whole seconds; Redis rejects `EX 0`.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Single `MGET` over all keys.
fn get_command(keys: &[String]) -> redis::Cmd {
    let mut cmd = redis::cmd("MGET");
    cmd.arg(keys);
    cmd
}

/// One `MSET` without a TTL. MSET has no per-key expiry, so with a TTL every
/// entry gets its own `SET .. EX`, sent as one pipeline.
fn put_command(entries: &[(String, String)], ttl: Option<Duration>) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    match ttl {
        Some(ttl) => {
            let seconds = ttl_seconds(ttl);
            for (key, json) in entries {
                pipe.cmd("SET")
                    .arg(key)
                    .arg(json)
                    .arg("EX")
                    .arg(seconds)
                    .ignore();
            }
        }
        None => {
            pipe.cmd("MSET").arg(entries).ignore();
        }
    }
    pipe
}

#[async_trait]
impl EphemeralStore for RedisStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.clone();
        let values = get_command(keys)
            .query_async::<Vec<Option<String>>>(&mut conn)
            .await?;
        Ok(values)
    }

    async fn put_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        put_command(&entries, ttl)
            .query_async::<()>(&mut conn)
            .await?;
        debug!("Wrote {} ephemeral entries (ttl: {:?})", entries.len(), ttl);
        Ok(())
    }
}
