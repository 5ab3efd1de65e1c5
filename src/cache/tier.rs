//! The contract shared by every cache tier.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::tile::{TileBlob, TileKey};

use super::memory::MemoryTier;
use super::store::PersistentTileStore;

// =============================================================================
// CacheTier Trait
// =============================================================================

/// One storage layer of a [`CacheChain`](super::CacheChain).
///
/// All methods may be called concurrently from render paths and background
/// jobs. A miss is `Ok(None)`, never an error; errors are reserved for
/// storage failures of durable tiers.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether writes to this tier are silently discarded.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Look up a tile, refreshing its recency where the tier tracks one.
    async fn lookup(&self, key: &TileKey) -> Result<Option<TileBlob>, StorageError>;

    /// Check for a tile without touching its recency.
    async fn contains(&self, key: &TileKey) -> Result<bool, StorageError>;

    /// Store a tile. On a read-only tier this succeeds without effect.
    async fn store(&self, key: &TileKey, blob: &TileBlob) -> Result<(), StorageError>;

    /// Remove every tile.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Remove every tile stored under `cache_key`.
    async fn clear_for_cache_key(&self, cache_key: &str) -> Result<(), StorageError>;

    /// Memory-pressure hint. Must not block and must tolerate being called
    /// while the tier itself is busy.
    fn on_low_memory(&self);
}

// =============================================================================
// TierHandle
// =============================================================================

/// Shared handle to one of the known tier variants.
///
/// The variant set is closed; chains dispatch through this enum rather than
/// through trait objects. Handles are cheap to clone and several chains may
/// hold the same tier.
#[derive(Clone)]
pub enum TierHandle {
    Memory(Arc<MemoryTier>),
    Persistent(Arc<PersistentTileStore>),
}

impl TierHandle {
    /// Whether two handles point at the same tier instance.
    pub fn same_tier(&self, other: &TierHandle) -> bool {
        match (self, other) {
            (TierHandle::Memory(a), TierHandle::Memory(b)) => Arc::ptr_eq(a, b),
            (TierHandle::Persistent(a), TierHandle::Persistent(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn tier(&self) -> &dyn CacheTier {
        match self {
            TierHandle::Memory(t) => t.as_ref(),
            TierHandle::Persistent(t) => t.as_ref(),
        }
    }
}

impl std::fmt::Debug for TierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TierHandle").field(&self.tier().name()).finish()
    }
}

impl From<Arc<MemoryTier>> for TierHandle {
    fn from(tier: Arc<MemoryTier>) -> Self {
        TierHandle::Memory(tier)
    }
}

impl From<Arc<PersistentTileStore>> for TierHandle {
    fn from(tier: Arc<PersistentTileStore>) -> Self {
        TierHandle::Persistent(tier)
    }
}

impl From<MemoryTier> for TierHandle {
    fn from(tier: MemoryTier) -> Self {
        TierHandle::Memory(Arc::new(tier))
    }
}

impl From<PersistentTileStore> for TierHandle {
    fn from(tier: PersistentTileStore) -> Self {
        TierHandle::Persistent(Arc::new(tier))
    }
}

#[async_trait]
impl CacheTier for TierHandle {
    fn name(&self) -> &'static str {
        self.tier().name()
    }

    fn is_read_only(&self) -> bool {
        self.tier().is_read_only()
    }

    async fn lookup(&self, key: &TileKey) -> Result<Option<TileBlob>, StorageError> {
        self.tier().lookup(key).await
    }

    async fn contains(&self, key: &TileKey) -> Result<bool, StorageError> {
        self.tier().contains(key).await
    }

    async fn store(&self, key: &TileKey, blob: &TileBlob) -> Result<(), StorageError> {
        self.tier().store(key, blob).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.tier().clear().await
    }

    async fn clear_for_cache_key(&self, cache_key: &str) -> Result<(), StorageError> {
        self.tier().clear_for_cache_key(cache_key).await
    }

    fn on_low_memory(&self) {
        self.tier().on_low_memory()
    }
}
