//! In-memory tile tier.
//!
//! A fixed-capacity LRU map keyed by tile hash and cache key. This is the
//! fastest tier of a chain and the first to be sacrificed under memory
//! pressure: it is cheap to repopulate from durable tiers.
//!
//! # Eviction
//!
//! Capacity is counted in tiles. Inserting into a full tier evicts the least
//! recently used entry in the same critical section as the insert, so the
//! tier never holds more than `capacity` tiles, even transiently.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::StorageError;
use crate::tile::{TileBlob, TileHash, TileKey};

use super::tier::CacheTier;

/// Default capacity in tiles.
pub const DEFAULT_MEMORY_TIER_CAPACITY: usize = 128;

/// Entries are keyed by coordinate hash plus source scope.
type EntryKey = (TileHash, Arc<str>);

struct MemoryState {
    entries: LruCache<EntryKey, TileBlob>,
    bytes: usize,
}

impl MemoryState {
    fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }
}

// =============================================================================
// Memory Tier
// =============================================================================

/// Bounded, volatile LRU tier.
///
/// # Thread Safety
///
/// The map sits behind a single async mutex. [`CacheTier::on_low_memory`] is
/// synchronous: if the mutex is free the tier is cleared on the spot,
/// otherwise the clear is deferred to the next operation that takes the lock.
///
/// # Example
///
/// ```
/// use tile_cache::cache::{CacheTier, MemoryTier};
/// use tile_cache::tile::{ImageFormat, TileBlob, TileKey};
///
/// #[tokio::main]
/// async fn main() {
///     let tier = MemoryTier::with_capacity(2);
///     let key = TileKey::new(1, 0, 1, "osm").unwrap();
///     let blob = TileBlob::new(vec![0xFF, 0xD8, 0xFF], ImageFormat::Jpeg);
///
///     tier.store(&key, &blob).await.unwrap();
///     assert_eq!(tier.lookup(&key).await.unwrap(), Some(blob));
/// }
/// ```
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    capacity: NonZeroUsize,
    clear_requested: AtomicBool,
}

impl MemoryTier {
    /// Create a tier with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_TIER_CAPACITY)
    }

    /// Create a tier holding at most `capacity` tiles (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(capacity),
                bytes: 0,
            }),
            capacity,
            clear_requested: AtomicBool::new(false),
        }
    }

    /// Acquire the map, applying a deferred low-memory clear first.
    async fn lock(&self) -> MutexGuard<'_, MemoryState> {
        let mut state = self.state.lock().await;
        if self.clear_requested.swap(false, Ordering::AcqRel) {
            debug!("Applying deferred low-memory clear");
            state.clear();
        }
        state
    }

    fn entry_key(key: &TileKey) -> EntryKey {
        (key.hash(), Arc::clone(&key.cache_key))
    }

    /// Maximum number of tiles.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Current number of tiles.
    pub async fn len(&self) -> usize {
        self.lock().await.entries.len()
    }

    /// Whether the tier holds no tiles.
    pub async fn is_empty(&self) -> bool {
        self.lock().await.entries.is_empty()
    }

    /// Total payload size of held tiles in bytes.
    pub async fn size(&self) -> usize {
        self.lock().await.bytes
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn lookup(&self, key: &TileKey) -> Result<Option<TileBlob>, StorageError> {
        let mut state = self.lock().await;
        Ok(state.entries.get(&Self::entry_key(key)).cloned())
    }

    async fn contains(&self, key: &TileKey) -> Result<bool, StorageError> {
        let state = self.lock().await;
        Ok(state.entries.contains(&Self::entry_key(key)))
    }

    async fn store(&self, key: &TileKey, blob: &TileBlob) -> Result<(), StorageError> {
        let mut state = self.lock().await;
        state.bytes += blob.len();

        // push returns either the replaced value for this key or the evicted LRU entry
        if let Some((_, displaced)) = state.entries.push(Self::entry_key(key), blob.clone()) {
            state.bytes = state.bytes.saturating_sub(displaced.len());
        }

        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.lock().await.clear();
        Ok(())
    }

    async fn clear_for_cache_key(&self, cache_key: &str) -> Result<(), StorageError> {
        let mut state = self.lock().await;
        let doomed: Vec<EntryKey> = state
            .entries
            .iter()
            .filter(|((_, scope), _)| &**scope == cache_key)
            .map(|(k, _)| k.clone())
            .collect();

        for k in doomed {
            if let Some(blob) = state.entries.pop(&k) {
                state.bytes = state.bytes.saturating_sub(blob.len());
            }
        }

        Ok(())
    }

    fn on_low_memory(&self) {
        match self.state.try_lock() {
            Ok(mut state) => {
                debug!(tiles = state.entries.len(), "Low memory: clearing memory tier");
                state.clear();
            }
            Err(_) => {
                self.clear_requested.store(true, Ordering::Release);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
