//! In-memory stand-ins for the stores and the recomputer, used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    CacheError, CachedRow, EntityVersion, EphemeralStore, PersistentCache, Recomputer,
    VersionSource,
};

fn unreachable_db() -> CacheError {
    CacheError::Database(sqlx::Error::PoolTimedOut)
}

#[derive(Default)]
struct DbState {
    versions: Mutex<HashMap<i64, i64>>,
    rows: Mutex<HashMap<i64, (i64, String)>>,
    failing_ids: Mutex<HashSet<i64>>,
    versions_failing: AtomicBool,
    persistent_delay: Mutex<Option<Duration>>,
    version_calls: AtomicUsize,
    query_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

/// Entity table plus cache table, shared by [`FakeVersions`] and [`FakePersistent`]
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<DbState>,
}

impl FakeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn versions(&self) -> FakeVersions {
        FakeVersions { db: self.clone() }
    }

    pub fn persistent(&self) -> FakePersistent {
        FakePersistent { db: self.clone() }
    }

    pub fn set_version(&self, id: i64, version: i64) {
        self.state.versions.lock().unwrap().insert(id, version);
    }

    pub fn set_cache_row(&self, id: i64, version: i64, json: &str) {
        self.state
            .rows
            .lock()
            .unwrap()
            .insert(id, (version, json.to_owned()));
    }

    pub fn cache_row(&self, id: i64) -> Option<(i64, String)> {
        self.state.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn cache_row_count(&self) -> usize {
        self.state.rows.lock().unwrap().len()
    }

    /// Any persistent query or write that touches one of `ids` fails.
    pub fn fail_persistent_for(&self, ids: &[i64]) {
        self.state
            .failing_ids
            .lock()
            .unwrap()
            .extend(ids.iter().copied());
    }

    pub fn fail_versions(&self, failing: bool) {
        self.state.versions_failing.store(failing, Ordering::SeqCst);
    }

    pub fn delay_persistent(&self, delay: Duration) {
        *self.state.persistent_delay.lock().unwrap() = Some(delay);
    }

    pub fn version_calls(&self) -> usize {
        self.state.version_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.state.query_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.state.write_calls.load(Ordering::SeqCst)
    }

    fn touches_failing(&self, ids: &[i64]) -> bool {
        let failing = self.state.failing_ids.lock().unwrap();
        ids.iter().any(|id| failing.contains(id))
    }

    async fn persistent_delay(&self) {
        let delay = *self.state.persistent_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

pub struct FakeVersions {
    db: FakeDb,
}

#[async_trait]
impl VersionSource for FakeVersions {
    async fn load_versions(&self, ids: &[i64]) -> Result<Vec<EntityVersion>, CacheError> {
        self.db.state.version_calls.fetch_add(1, Ordering::SeqCst);
        if self.db.state.versions_failing.load(Ordering::SeqCst) {
            return Err(unreachable_db());
        }
        let versions = self.db.state.versions.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                versions
                    .get(id)
                    .map(|&version| EntityVersion { id: *id, version })
            })
            .collect())
    }
}

pub struct FakePersistent {
    db: FakeDb,
}

#[async_trait]
impl PersistentCache for FakePersistent {
    async fn query_rows(&self, ids: &[i64]) -> Result<Vec<CachedRow>, CacheError> {
        self.db.state.query_calls.fetch_add(1, Ordering::SeqCst);
        self.db.persistent_delay().await;
        if self.db.touches_failing(ids) {
            return Err(unreachable_db());
        }
        let versions = self.db.state.versions.lock().unwrap();
        let rows = self.db.state.rows.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                let candidate_version = *versions.get(id)?;
                let cached = rows.get(id);
                Some(CachedRow {
                    id: *id,
                    candidate_version,
                    cached_version: cached.map(|(v, _)| *v),
                    json: cached.map(|(_, json)| json.clone()),
                })
            })
            .collect())
    }

    async fn write_row(&self, id: i64, version: i64, json: &str) -> Result<(), CacheError> {
        self.db.state.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.db.touches_failing(&[id]) {
            return Err(unreachable_db());
        }
        let mut rows = self.db.state.rows.lock().unwrap();
        match rows.get(&id) {
            Some((existing, _)) if *existing > version => {}
            _ => {
                rows.insert(id, (version, json.to_owned()));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    entries: Mutex<HashMap<String, String>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    last_ttl: Mutex<Option<Duration>>,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

/// Key-value store that can be made slow or unreachable
#[derive(Clone, Default)]
pub struct FakeStore {
    state: Arc<StoreState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.state
            .entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state.entries.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> HashSet<String> {
        self.state.entries.lock().unwrap().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.state.entries.lock().unwrap().clear();
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = Some(delay);
    }

    pub fn last_ttl(&self) -> Option<Duration> {
        *self.state.last_ttl.lock().unwrap()
    }

    pub fn get_calls(&self) -> usize {
        self.state.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.state.put_calls.load(Ordering::SeqCst)
    }

    async fn maybe_fail(&self) -> Result<(), CacheError> {
        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.failing.load(Ordering::SeqCst) {
            let err: redis::RedisError =
                (redis::ErrorKind::IoError, "connection refused").into();
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl EphemeralStore for FakeStore {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        self.state.get_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail().await?;
        let entries = self.state.entries.lock().unwrap();
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }

    async fn put_many(
        &self,
        entries: Vec<(String, String)>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.state.put_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_fail().await?;
        *self.state.last_ttl.lock().unwrap() = ttl;
        self.state.entries.lock().unwrap().extend(entries);
        Ok(())
    }
}

type ComputeHook = Box<dyn Fn(i64) + Send + Sync>;

#[derive(Default)]
struct RecomputerState {
    calls: Mutex<HashMap<i64, usize>>,
    failing: Mutex<HashSet<i64>>,
    overrides: Mutex<HashMap<i64, String>>,
    hook: Mutex<Option<ComputeHook>>,
}

/// Produces `{"id":<id>,"n":<call count>}` unless told otherwise
#[derive(Clone, Default)]
pub struct FakeRecomputer {
    state: Arc<RecomputerState>,
}

impl FakeRecomputer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, id: i64) {
        self.state.failing.lock().unwrap().insert(id);
    }

    pub fn respond_with(&self, id: i64, json: &str) {
        self.state
            .overrides
            .lock()
            .unwrap()
            .insert(id, json.to_owned());
    }

    /// Run `hook` inside every compute call, before the result is produced.
    pub fn on_compute(&self, hook: impl Fn(i64) + Send + Sync + 'static) {
        *self.state.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self, id: i64) -> usize {
        self.state.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Recomputer for FakeRecomputer {
    async fn compute(&self, id: i64) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let n = {
            let mut calls = self.state.calls.lock().unwrap();
            let n = calls.entry(id).or_default();
            *n += 1;
            *n
        };
        if let Some(hook) = self.state.hook.lock().unwrap().as_ref() {
            hook(id);
        }
        if self.state.failing.lock().unwrap().contains(&id) {
            return Err(format!("aggregation failed for {}", id).into());
        }
        if let Some(json) = self.state.overrides.lock().unwrap().get(&id) {
            return Ok(json.clone());
        }
        Ok(format!("{{\"id\":{},\"n\":{}}}", id, n))
    }
}
