//! Recompute capability
//!
//! The JSON representation itself is produced elsewhere; the cache only calls
//! into it on a miss in both tiers.

use async_trait::async_trait;

/// Trait for producing the fresh JSON representation of an entity.
///
/// Repeated calls against the same version should yield equivalent JSON.
#[async_trait]
pub trait Recomputer: Send + Sync + 'static {
    async fn compute(&self, id: i64) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}
