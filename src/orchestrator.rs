//! Versioned read-through protocol
//!
//! This module composes the tiers into one batched read:
//! - Authoritative versions decide which ids exist and what "current" means
//! - L1: versioned keys in the ephemeral store (fastest, disposable)
//! - L2: version-tagged rows in the persistent cache table
//! - Recompute: the external capability, written back to both tiers
//!
//! Nothing is ever invalidated. A version bump changes the L1 key and makes
//! the L2 row fail the equality check, so the next read recomputes.
//!
//! Failures are isolated per tier and per id:
//! - L1 errors and timeouts read as misses, L1 write-back errors are logged
//! - an L2 chunk that fails sends only its own ids to recompute
//! - recompute and corrupt payload errors land in [`BatchResult::failed`]
//! - only a failed version lookup fails the whole batch

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, warn};

use crate::{
    CacheConfig, CacheError, EphemeralCache, EphemeralStore, PersistentCache, Recomputer, Tier,
    VersionSource, VersionedJson, validate_payload,
};

/// Outcome of a batch read, partitioned per id
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Current JSON per id
    pub found: HashMap<i64, String>,
    /// Ids with no authoritative version: the entity does not exist
    pub not_found: HashSet<i64>,
    /// Ids whose recompute failed or produced a corrupt payload
    pub failed: HashMap<i64, CacheError>,
}

impl BatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Per-tier counts for one batch, logged when `log_batch_summary` is set
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub requested: usize,
    pub not_found: usize,
    pub ephemeral_hits: usize,
    pub persistent_hits: usize,
    pub recomputed: usize,
    pub failed: usize,
}

/// Versioned two-tier read-through cache
pub struct CacheOrchestrator<V, P, S, R>
where
    V: VersionSource,
    P: PersistentCache,
    S: EphemeralStore,
    R: Recomputer,
{
    inner: Arc<OrchestratorInner<V, P, S, R>>,
}

struct OrchestratorInner<V, P, S, R>
where
    V: VersionSource,
    P: PersistentCache,
    S: EphemeralStore,
    R: Recomputer,
{
    versions: V,
    persistent: P,
    ephemeral: EphemeralCache<S>,
    recomputer: R,
    config: CacheConfig,
}

impl<V, P, S, R> Clone for CacheOrchestrator<V, P, S, R>
where
    V: VersionSource,
    P: PersistentCache,
    S: EphemeralStore,
    R: Recomputer,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Run `fut` under an optional deadline, mapping expiry to [`CacheError::Timeout`].
async fn with_deadline<T, F>(tier: Tier, limit: Option<Duration>, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = Result<T, CacheError>>,
{
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| CacheError::Timeout { tier, after })?,
        None => fut.await,
    }
}

impl<V, P, S, R> CacheOrchestrator<V, P, S, R>
where
    V: VersionSource,
    P: PersistentCache,
    S: EphemeralStore,
    R: Recomputer,
{
    pub fn new(versions: V, persistent: P, store: S, recomputer: R, config: CacheConfig) -> Self {
        let ephemeral = EphemeralCache::new(store, config.namespace.clone(), config.ephemeral_ttl);
        Self {
            inner: Arc::new(OrchestratorInner {
                versions,
                persistent,
                ephemeral,
                recomputer,
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn ephemeral(&self) -> &EphemeralCache<S> {
        &self.inner.ephemeral
    }

    pub fn persistent(&self) -> &P {
        &self.inner.persistent
    }

    /// Read the current JSON for every id.
    ///
    /// Errors only when the authoritative versions cannot be read; every
    /// other failure is absorbed or reported per id.
    pub async fn batch_get(&self, ids: &HashSet<i64>) -> Result<BatchResult, CacheError> {
        let mut result = BatchResult::default();
        if ids.is_empty() {
            return Ok(result);
        }
        let mut stats = BatchStats {
            requested: ids.len(),
            ..BatchStats::default()
        };

        let versions = self.fetch_versions(ids).await?;
        result.not_found = ids
            .iter()
            .filter(|id| !versions.contains_key(*id))
            .copied()
            .collect();
        stats.not_found = result.not_found.len();
        if versions.is_empty() {
            self.log_summary(&stats);
            return Ok(result);
        }

        // L1
        let hits_l1 = self.lookup_ephemeral(&versions).await;
        stats.ephemeral_hits = hits_l1.len();

        let mut remaining: Vec<i64> = versions
            .keys()
            .filter(|id| !hits_l1.contains_key(*id))
            .copied()
            .collect();
        remaining.sort_unstable();
        result.found.extend(hits_l1);

        // L2
        let hits_l2 = self.lookup_persistent(&remaining).await;
        stats.persistent_hits = hits_l2.len();
        self.write_back(&hits_l2).await;

        let targets: Vec<(i64, i64)> = remaining
            .into_iter()
            .filter(|id| !hits_l2.contains_key(id))
            .filter_map(|id| versions.get(&id).map(|&version| (id, version)))
            .collect();
        result
            .found
            .extend(hits_l2.into_iter().map(|(id, row)| (id, row.json)));

        // Recompute
        stats.recomputed = self.recompute_and_store(targets, &mut result).await;
        stats.failed = result.failed.len();

        self.log_summary(&stats);
        Ok(result)
    }

    /// Single-id convenience over [`Self::batch_get`].
    ///
    /// `Ok(None)` means the entity does not exist.
    pub async fn get(&self, id: i64) -> Result<Option<String>, CacheError> {
        let mut result = self.batch_get(&HashSet::from([id])).await?;
        if let Some(err) = result.failed.remove(&id) {
            return Err(err);
        }
        Ok(result.found.remove(&id))
    }

    /// Recompute existing ids regardless of what either tier holds, and
    /// write the results to both tiers.
    pub async fn refresh(&self, ids: &HashSet<i64>) -> Result<BatchResult, CacheError> {
        let mut result = BatchResult::default();
        if ids.is_empty() {
            return Ok(result);
        }
        let versions = self.fetch_versions(ids).await?;
        result.not_found = ids
            .iter()
            .filter(|id| !versions.contains_key(*id))
            .copied()
            .collect();

        let mut targets: Vec<(i64, i64)> = versions.into_iter().collect();
        targets.sort_unstable();
        let recomputed = self.recompute_and_store(targets, &mut result).await;
        debug!(
            "Refreshed {} ids ({} failed, {} not found)",
            recomputed,
            result.failed.len(),
            result.not_found.len()
        );
        Ok(result)
    }

    async fn fetch_versions(&self, ids: &HashSet<i64>) -> Result<HashMap<i64, i64>, CacheError> {
        let config = &self.inner.config;
        with_deadline(
            Tier::Version,
            config.version_timeout,
            self.inner.versions.fetch_versions(ids),
        )
        .await
        .inspect_err(|e| error!("Version lookup failed for {} ids: {}", ids.len(), e))
    }

    async fn lookup_ephemeral(&self, versions: &HashMap<i64, i64>) -> HashMap<i64, String> {
        let config = &self.inner.config;
        match with_deadline(
            Tier::Ephemeral,
            config.ephemeral_timeout,
            self.inner.ephemeral.multi_get(versions),
        )
        .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(
                    "L1 GET failed for {} ids ({}). Falling back to persistent cache.",
                    versions.len(),
                    e
                );
                HashMap::new()
            }
        }
    }

    /// Look up L2 in chunks; a failed chunk contributes no hits.
    async fn lookup_persistent(&self, ids: &[i64]) -> HashMap<i64, VersionedJson> {
        let config = &self.inner.config;
        let chunks: Vec<&[i64]> = ids.chunks(config.persistent_batch_size.max(1)).collect();
        let outcomes = futures::future::join_all(chunks.iter().map(|chunk| {
            with_deadline(
                Tier::Persistent,
                config.persistent_timeout,
                self.inner.persistent.fetch_cached(chunk),
            )
        }))
        .await;

        let mut hits = HashMap::new();
        for (chunk, outcome) in chunks.into_iter().zip(outcomes) {
            match outcome {
                Ok(rows) => {
                    for row in rows {
                        let id = row.id;
                        let current = row.is_cache_hit();
                        match row.into_hit() {
                            Some((version, json)) => {
                                debug!("Cache hit L2 for id {} at version {}", id, version);
                                hits.insert(id, VersionedJson { version, json });
                            }
                            None if current => {
                                warn!("Blank L2 payload for id {}. Recomputing.", id)
                            }
                            None => debug!("Cache miss L2 for id {}", id),
                        }
                    }
                }
                Err(e) => warn!(
                    "L2 lookup failed for {} ids ({}). Recomputing them.",
                    chunk.len(),
                    e
                ),
            }
        }
        hits
    }

    /// Best-effort L1 population.
    async fn write_back(&self, rows: &HashMap<i64, VersionedJson>) {
        if rows.is_empty() {
            return;
        }
        let config = &self.inner.config;
        if let Err(e) = with_deadline(
            Tier::Ephemeral,
            config.ephemeral_timeout,
            self.inner.ephemeral.put_all(rows),
        )
        .await
        {
            warn!("L1 write-back failed for {} ids ({}). Continuing.", rows.len(), e);
        }
    }

    /// Recompute each `(id, version)`, persist, then fill L1. Returns the
    /// number of ids that produced a value.
    async fn recompute_and_store(
        &self,
        targets: Vec<(i64, i64)>,
        result: &mut BatchResult,
    ) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let concurrency = self.inner.config.recompute_concurrency.max(1);
        let outcomes: Vec<(i64, Result<VersionedJson, CacheError>)> =
            futures::stream::iter(targets)
                .map(|(id, version)| async move { (id, self.recompute_one(id, version).await) })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut fresh = HashMap::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(row) => {
                    fresh.insert(id, row);
                }
                Err(e) => {
                    result.failed.insert(id, e);
                }
            }
        }

        self.write_back(&fresh).await;
        let produced = fresh.len();
        result
            .found
            .extend(fresh.into_iter().map(|(id, row)| (id, row.json)));
        produced
    }

    /// Compute fresh JSON for `id`, tagged with the version read before the
    /// computation started, and upsert it into L2.
    async fn recompute_one(&self, id: i64, version: i64) -> Result<VersionedJson, CacheError> {
        let inner = &self.inner;
        let json = inner.recomputer.compute(id).await.map_err(|source| {
            error!("Recompute failed for id {}: {}", id, source);
            CacheError::Recompute { id, source }
        })?;

        validate_payload(id, Some(json.as_str()))
            .inspect_err(|e| error!("Rejecting recomputed payload: {}", e))?;
        if inner.config.validate_json
            && let Err(e) = serde_json::from_str::<serde::de::IgnoredAny>(&json)
        {
            error!("Recomputed payload for id {} is not JSON: {}", id, e);
            return Err(CacheError::CorruptPayload {
                id,
                reason: format!("invalid JSON: {}", e),
            });
        }

        match with_deadline(
            Tier::Persistent,
            inner.config.persistent_timeout,
            inner.persistent.upsert(id, version, &json),
        )
        .await
        {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!(
                    "L2 upsert failed for id {} at version {} ({}). Serving fresh value.",
                    id, version, e
                );
            }
            Err(e) => return Err(e),
        }

        debug!("Recomputed id {} at version {}", id, version);
        Ok(VersionedJson { version, json })
    }

    fn log_summary(&self, stats: &BatchStats) {
        if self.inner.config.log_batch_summary {
            debug!(
                requested = stats.requested,
                not_found = stats.not_found,
                l1_hits = stats.ephemeral_hits,
                l2_hits = stats.persistent_hits,
                recomputed = stats.recomputed,
                failed = stats.failed,
                "Batch read complete"
            );
        }
    }
}
