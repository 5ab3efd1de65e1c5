//! Tile source abstraction.
//!
//! A tile source produces tile bytes for a [`TileKey`] from somewhere outside
//! the cache: a tile server, an MBTiles file, a renderer. The cache never
//! looks inside the bytes; it only needs the source's cache key to scope
//! what it stores.
//!
//! Sources are asynchronous by default. Sources built on blocking I/O
//! implement [`BlockingTileSource`] instead and are wrapped in
//! [`BlockingSource`], which moves every fetch onto tokio's blocking pool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::tile::{TileBlob, TileKey, MAX_ZOOM};

// =============================================================================
// TileSource Trait
// =============================================================================

/// Asynchronous producer of tile bytes.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Stable identifier scoping this source's tiles inside shared tiers.
    fn cache_key(&self) -> &str;

    /// Lowest zoom level the source can serve.
    fn min_zoom(&self) -> u8 {
        0
    }

    /// Highest zoom level the source can serve.
    fn max_zoom(&self) -> u8 {
        MAX_ZOOM
    }

    /// Fetch one tile.
    async fn fetch(&self, key: &TileKey) -> Result<TileBlob, FetchError>;
}

// =============================================================================
// Blocking sources
// =============================================================================

/// Tile producer whose fetch blocks the calling thread.
pub trait BlockingTileSource: Send + Sync + 'static {
    fn cache_key(&self) -> &str;

    fn min_zoom(&self) -> u8 {
        0
    }

    fn max_zoom(&self) -> u8 {
        MAX_ZOOM
    }

    fn fetch_blocking(&self, key: &TileKey) -> Result<TileBlob, FetchError>;
}

/// Adapts a [`BlockingTileSource`] to [`TileSource`].
pub struct BlockingSource<S> {
    inner: Arc<S>,
}

impl<S: BlockingTileSource> BlockingSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

#[async_trait]
impl<S: BlockingTileSource> TileSource for BlockingSource<S> {
    fn cache_key(&self) -> &str {
        self.inner.cache_key()
    }

    fn min_zoom(&self) -> u8 {
        self.inner.min_zoom()
    }

    fn max_zoom(&self) -> u8 {
        self.inner.max_zoom()
    }

    async fn fetch(&self, key: &TileKey) -> Result<TileBlob, FetchError> {
        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        tokio::task::spawn_blocking(move || inner.fetch_blocking(&key))
            .await
            .map_err(|e| FetchError::Source(format!("blocking fetch task failed: {}", e)))?
    }
}
