//! Persistent JSON cache (L2)
//!
//! One row per entity id, tagged with the version the JSON was computed
//! against. Lookups join the authoritative version so a single query tells
//! hit, stale and missing apart:
//!
//! - hit: `cached_version == candidate_version`
//! - stale: a row exists at an older version
//! - miss: no row yet (`cached_version` and `json` are null)

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, error};

use crate::{CacheError, TableNames};

/// Result of a persistent cache lookup for one existing entity
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CachedRow {
    pub id: i64,
    /// Authoritative version at query time
    pub candidate_version: i64,
    /// Version the cached JSON was computed against, if a row exists
    pub cached_version: Option<i64>,
    pub json: Option<String>,
}

impl CachedRow {
    /// The only freshness rule: the cached version equals the authoritative one.
    pub fn is_cache_hit(&self) -> bool {
        self.cached_version
            .is_some_and(|cached| cached == self.candidate_version)
    }

    /// Consume the row, returning `(version, json)` when it is a hit with a
    /// usable payload. A null or blank payload reads as a miss.
    pub fn into_hit(self) -> Option<(i64, String)> {
        if !self.is_cache_hit() || validate_payload(self.id, self.json.as_deref()).is_err() {
            return None;
        }
        match (self.cached_version, self.json) {
            (Some(version), Some(json)) => Some((version, json)),
            _ => None,
        }
    }
}

/// Reject null or blank payloads.
///
/// Blank JSON written to the persistent tier would be served to every
/// later reader, so this is a hard error rather than a skip.
pub fn validate_payload(id: i64, json: Option<&str>) -> Result<&str, CacheError> {
    match json {
        None => Err(CacheError::CorruptPayload {
            id,
            reason: "payload is null".to_owned(),
        }),
        Some(s) if s.trim().is_empty() => Err(CacheError::CorruptPayload {
            id,
            reason: "payload is blank".to_owned(),
        }),
        Some(s) => Ok(s),
    }
}

/// Durable, version-tagged JSON cache.
///
/// Implementors provide the raw store access; the provided methods carry the
/// empty-input short circuit and payload validation.
#[async_trait]
pub trait PersistentCache: Send + Sync + 'static {
    /// Left-join the authoritative versions with cache rows for non-empty `ids`.
    async fn query_rows(&self, ids: &[i64]) -> Result<Vec<CachedRow>, CacheError>;

    /// Insert or overwrite the row for `id` in one atomic statement.
    async fn write_row(&self, id: i64, version: i64, json: &str) -> Result<(), CacheError>;

    /// One row per requested id that exists in the entity table.
    async fn fetch_cached(&self, ids: &[i64]) -> Result<Vec<CachedRow>, CacheError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.query_rows(ids).await
    }

    /// Idempotent upsert. Fails with [`CacheError::CorruptPayload`] before
    /// touching the store if `json` is blank.
    async fn upsert(&self, id: i64, version: i64, json: &str) -> Result<(), CacheError> {
        if let Err(e) = validate_payload(id, Some(json)) {
            error!("Refusing to persist payload for id {}: {}", id, e);
            return Err(e);
        }
        self.write_row(id, version, json).await
    }
}

/// Persistent cache backed by a Postgres table
#[derive(Debug, Clone)]
pub struct PgPersistentCache {
    pool: PgPool,
    select_sql: String,
    upsert_sql: String,
    create_sql: String,
}

impl PgPersistentCache {
    /// Create a cache over `tables.cache_table`, joined to `tables.entity_table`.
    pub fn new(pool: PgPool, tables: &TableNames) -> Result<Self, CacheError> {
        tables.validate()?;
        Ok(Self {
            pool,
            select_sql: select_rows_sql(tables),
            upsert_sql: upsert_sql(tables),
            create_sql: create_table_sql(tables),
        })
    }

    /// Create the cache table if it does not exist yet.
    pub async fn ensure_table(&self) -> Result<(), CacheError> {
        sqlx::query(&self.create_sql).execute(&self.pool).await?;
        Ok(())
    }
}

fn select_rows_sql(tables: &TableNames) -> String {
    format!(
        "SELECT e.{id} AS id, e.{version} AS candidate_version, \
         c.data_version AS cached_version, c.json::text AS json \
         FROM {entity} e LEFT JOIN {cache} c ON c.candidate_id = e.{id} \
         WHERE e.{id} = ANY($1)",
        id = tables.entity_id_column,
        version = tables.version_column,
        entity = tables.entity_table,
        cache = tables.cache_table,
    )
}

// The WHERE clause keeps a late writer holding an older version from
// replacing a newer row.
fn upsert_sql(tables: &TableNames) -> String {
    format!(
        "INSERT INTO {cache} (candidate_id, data_version, json, computed_at) \
         VALUES ($1, $2, $3, now()) \
         ON CONFLICT (candidate_id) DO UPDATE SET \
         data_version = EXCLUDED.data_version, json = EXCLUDED.json, \
         computed_at = EXCLUDED.computed_at \
         WHERE {cache}.data_version <= EXCLUDED.data_version",
        cache = tables.cache_table,
    )
}

fn create_table_sql(tables: &TableNames) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {cache} (\
         candidate_id BIGINT PRIMARY KEY, \
         data_version BIGINT NOT NULL, \
         json TEXT NOT NULL CHECK (btrim(json) <> ''), \
         computed_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        cache = tables.cache_table,
    )
}

#[async_trait]
impl PersistentCache for PgPersistentCache {
    async fn query_rows(&self, ids: &[i64]) -> Result<Vec<CachedRow>, CacheError> {
        let rows = sqlx::query_as::<_, CachedRow>(&self.select_sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        debug!("Fetched {} persistent rows for {} ids", rows.len(), ids.len());
        Ok(rows)
    }

    async fn write_row(&self, id: i64, version: i64, json: &str) -> Result<(), CacheError> {
        sqlx::query(&self.upsert_sql)
            .bind(id)
            .bind(version)
            .bind(json)
            .execute(&self.pool)
            .await?;
        debug!("Persisted json for id {} at version {}", id, version);
        Ok(())
    }
}
