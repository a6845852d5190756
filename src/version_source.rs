//! Authoritative version lookup
//!
//! The relational store owns one monotonic version counter per entity. Every
//! cache decision compares against it; nothing else signals freshness.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::{CacheError, TableNames};

/// Version counter of one entity, as read from the relational store
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct EntityVersion {
    pub id: i64,
    pub version: i64,
}

/// Read-only access to the authoritative version counters.
///
/// Implementors only provide [`VersionSource::load_versions`]; callers use
/// [`VersionSource::fetch_versions`], which never touches the store for an
/// empty request.
#[async_trait]
pub trait VersionSource: Send + Sync + 'static {
    /// Query the store for the given (non-empty) ids.
    ///
    /// Ids without an entity row are left out of the result.
    async fn load_versions(&self, ids: &[i64]) -> Result<Vec<EntityVersion>, CacheError>;

    /// Current version per existing id. Absent ids do not exist.
    async fn fetch_versions(&self, ids: &HashSet<i64>) -> Result<HashMap<i64, i64>, CacheError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = ids.iter().copied().collect();
        let rows = self.load_versions(&ids).await?;
        Ok(rows.into_iter().map(|row| (row.id, row.version)).collect())
    }
}

/// Version source backed by the Postgres entity table
#[derive(Debug, Clone)]
pub struct PgVersionSource {
    pool: PgPool,
    select_sql: String,
}

impl PgVersionSource {
    /// Create a version source reading from `tables.entity_table`.
    pub fn new(pool: PgPool, tables: &TableNames) -> Result<Self, CacheError> {
        tables.validate()?;
        Ok(Self {
            pool,
            select_sql: select_versions_sql(tables),
        })
    }
}

fn select_versions_sql(tables: &TableNames) -> String {
    format!(
        "SELECT {id} AS id, {version} AS version FROM {table} WHERE {id} = ANY($1)",
        id = tables.entity_id_column,
        version = tables.version_column,
        table = tables.entity_table,
    )
}

#[async_trait]
impl VersionSource for PgVersionSource {
    async fn load_versions(&self, ids: &[i64]) -> Result<Vec<EntityVersion>, CacheError> {
        let rows = sqlx::query_as::<_, EntityVersion>(&self.select_sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        debug!(
            "Loaded {} of {} requested versions",
            rows.len(),
            ids.len()
        );
        Ok(rows)
    }
}
