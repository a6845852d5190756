//! vcache - Versioned two-tier read-through cache
//!
//! This library serves a derived JSON representation of a frequently-changing
//! entity without explicit invalidation:
//! - Authority: a per-entity version counter in Postgres
//! - L1: Redis (or an in-process Moka store) under `<namespace>:<id>:v:<version>`
//! - L2: a Postgres table of JSON rows tagged with the version they were computed at
//! - Recompute: a pluggable capability invoked when both tiers miss
//!
//! The cache supports:
//! - Batched reads with per-id failure isolation
//! - Fall-through on ephemeral or persistent tier failures and timeouts
//! - Idempotent, atomic upserts that reject blank payloads
//! - Optional, correctness-free expiry for the ephemeral tier

mod candidate_cache;
mod config;
mod ephemeral_cache;
mod error;
mod local_store;
mod orchestrator;
mod persistent_cache;
mod recomputer;
mod version_source;

#[cfg(test)]
mod testing;

pub use candidate_cache::CandidateJsonCache;
pub use config::{CacheConfig, TableNames};
pub use ephemeral_cache::{EphemeralCache, EphemeralStore, RedisStore, VersionedJson, versioned_key};
pub use error::{CacheError, Tier};
pub use local_store::LocalStore;
pub use orchestrator::{BatchResult, BatchStats, CacheOrchestrator};
pub use persistent_cache::{CachedRow, PersistentCache, PgPersistentCache, validate_payload};
pub use recomputer::Recomputer;
pub use version_source::{EntityVersion, PgVersionSource, VersionSource};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
