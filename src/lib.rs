//! # tile-cache
//!
//! A tiered cache for raster map tiles, so a map renderer can keep working
//! from local storage when the network is slow, unavailable or best avoided.
//!
//! ## Features
//!
//! - **Tier chain**: an in-memory LRU tier in front of one or more durable
//!   tiers, with write-through promotion on hits in slower tiers
//! - **Durable store**: SQLite-backed with LRU or FIFO capacity purging,
//!   time-based expiry and a read-only mode for prepopulated bundles
//! - **Background prefetch**: bulk download of a region over a zoom range on
//!   a bounded worker pool, with progress notifications and cooperative
//!   cancellation
//!
//! ## Architecture
//!
//! - [`tile`] - Tile keys, hashes and payloads
//! - [`cache`] - Cache tiers and the chain
//! - [`source`] - Tile source abstraction
//! - [`prefetch`] - Region enumeration and the background fetch coordinator
//! - [`config`] - Configuration types and CLI
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tile_cache::{
//!     BackgroundFetchCoordinator, BoundingBox, CacheChain, CacheConfig, FetchConfig,
//!     MemoryTier, PersistentTileStore, TileSource,
//! };
//!
//! # async fn run(source: Arc<dyn TileSource>) -> Result<(), Box<dyn std::error::Error>> {
//! let store = PersistentTileStore::open("tiles.sqlite", CacheConfig::default().with_capacity(50_000))?;
//! let chain = Arc::new(CacheChain::new(vec![
//!     MemoryTier::with_capacity(256).into(),
//!     store.into(),
//! ]));
//!
//! let coordinator = BackgroundFetchCoordinator::new(chain.clone(), FetchConfig::default());
//! coordinator
//!     .start(source, BoundingBox::new(48.80, 2.25, 48.92, 2.42)?, 12, 15, "paris")
//!     .await?;
//! coordinator.wait_idle().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod prefetch;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use cache::{
    CacheChain, CacheTier, Clock, ManualClock, MemoryTier, PersistentTileStore, StoreLocation,
    SystemClock, TierHandle,
};
pub use config::{CacheConfig, FetchConfig, PurgeStrategy};
pub use error::{FetchError, StorageError, TileCacheError};
pub use prefetch::{
    BackgroundFetchCoordinator, BoundingBox, ChannelObserver, FetchEvent, FetchObserver, JobId,
    JobProgress, JobState, TileRange,
};
pub use source::{BlockingSource, BlockingTileSource, TileSource};
pub use tile::{ImageFormat, TileBlob, TileHash, TileKey, MAX_ZOOM};
