//! Ordered chain of cache tiers.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::source::TileSource;
use crate::tile::{TileBlob, TileKey};

use super::tier::{CacheTier, TierHandle};

// =============================================================================
// Cache Chain
// =============================================================================

/// Tiers ordered fastest-first, queried as one cache.
///
/// A hit in tier *i* is written through into tiers `0..i` before it is
/// returned. Writes go to every tier that is not read-only, and clears are
/// broadcast to all of them. A storage failure in one tier is logged and
/// treated as a miss for that tier; it never stops the remaining tiers from
/// being consulted.
///
/// The tier list is copy-on-write. Every operation works on a snapshot taken
/// at its start, so [`add_tier`](Self::add_tier) and friends never race with a
/// lookup mid-iteration; the change is seen by operations that start later.
pub struct CacheChain {
    tiers: RwLock<Arc<Vec<TierHandle>>>,
}

impl CacheChain {
    /// Create a chain from tiers ordered fastest-first.
    pub fn new(tiers: Vec<TierHandle>) -> Self {
        Self {
            tiers: RwLock::new(Arc::new(tiers)),
        }
    }

    /// Current tiers, fastest-first.
    pub fn tiers(&self) -> Arc<Vec<TierHandle>> {
        Arc::clone(&self.tiers.read())
    }

    /// Number of tiers.
    pub fn len(&self) -> usize {
        self.tiers.read().len()
    }

    /// Whether the chain has no tiers.
    pub fn is_empty(&self) -> bool {
        self.tiers.read().is_empty()
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<TierHandle>)) {
        let mut guard = self.tiers.write();
        let mut next = Vec::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Append a tier as the slowest.
    pub fn add_tier(&self, tier: impl Into<TierHandle>) {
        let tier = tier.into();
        debug!(tier = tier.name(), "Adding cache tier");
        self.mutate(|tiers| tiers.push(tier));
    }

    /// Insert a tier at `index`, clamped to the end of the chain.
    pub fn insert_tier_at(&self, index: usize, tier: impl Into<TierHandle>) {
        let tier = tier.into();
        debug!(tier = tier.name(), index, "Inserting cache tier");
        self.mutate(|tiers| {
            let index = index.min(tiers.len());
            tiers.insert(index, tier);
        });
    }

    /// Remove every occurrence of `tier`. Returns whether anything was removed.
    pub fn remove_tier(&self, tier: &TierHandle) -> bool {
        let mut removed = false;
        self.mutate(|tiers| {
            let before = tiers.len();
            tiers.retain(|t| !t.same_tier(tier));
            removed = tiers.len() != before;
        });
        removed
    }

    /// Look up a tile, promoting a hit into every faster tier.
    pub async fn lookup(&self, key: &TileKey) -> Option<TileBlob> {
        self.lookup_with_origin(key).await.map(|(blob, _)| blob)
    }

    /// Like [`lookup`](Self::lookup), also reporting the index of the tier
    /// that served the hit.
    pub async fn lookup_with_origin(&self, key: &TileKey) -> Option<(TileBlob, usize)> {
        let tiers = self.tiers();

        for (index, tier) in tiers.iter().enumerate() {
            let blob = match tier.lookup(key).await {
                Ok(Some(blob)) => blob,
                Ok(None) => continue,
                Err(e) => {
                    warn!(tier = tier.name(), tile = %key, error = %e, "Tier lookup failed");
                    continue;
                }
            };

            for faster in tiers[..index].iter().filter(|t| !t.is_read_only()) {
                if let Err(e) = faster.store(key, &blob).await {
                    warn!(tier = faster.name(), tile = %key, error = %e, "Promotion failed");
                }
            }

            return Some((blob, index));
        }

        None
    }

    /// Whether any tier holds the tile. Recency is not touched.
    pub async fn contains(&self, key: &TileKey) -> bool {
        for tier in self.tiers().iter() {
            match tier.contains(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!(tier = tier.name(), tile = %key, error = %e, "Tier membership check failed");
                }
            }
        }
        false
    }

    /// Write a tile into every writable tier.
    pub async fn store(&self, key: &TileKey, blob: &TileBlob) {
        for tier in self.tiers().iter().filter(|t| !t.is_read_only()) {
            if let Err(e) = tier.store(key, blob).await {
                warn!(tier = tier.name(), tile = %key, error = %e, "Tier store failed");
            }
        }
    }

    /// Remove every tile from every tier.
    pub async fn clear(&self) {
        for tier in self.tiers().iter() {
            if let Err(e) = tier.clear().await {
                warn!(tier = tier.name(), error = %e, "Tier clear failed");
            }
        }
    }

    /// Remove every tile scoped to `cache_key` from every tier.
    pub async fn clear_for_cache_key(&self, cache_key: &str) {
        for tier in self.tiers().iter() {
            if let Err(e) = tier.clear_for_cache_key(cache_key).await {
                warn!(tier = tier.name(), cache_key, error = %e, "Tier clear failed");
            }
        }
    }

    /// Forward a memory-pressure hint to every tier.
    pub fn on_low_memory(&self) {
        for tier in self.tiers().iter() {
            tier.on_low_memory();
        }
    }

    /// Serve a tile from the chain, fetching and storing it on a full miss.
    pub async fn fetch_through(
        &self,
        source: &dyn TileSource,
        key: &TileKey,
    ) -> Result<TileBlob, FetchError> {
        if let Some(blob) = self.lookup(key).await {
            return Ok(blob);
        }

        let blob = source.fetch(key).await?;
        self.store(key, &blob).await;
        Ok(blob)
    }
}

impl Default for CacheChain {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

// =============================================================================
// Tests
// =============================================================================
