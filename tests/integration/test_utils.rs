//! Test utilities for integration tests.
//!
//! Mock tile sources with fetch tracking, and helpers to build tile payloads
//! and stores on temporary files.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

use tile_cache::cache::{ManualClock, PersistentTileStore};
use tile_cache::config::CacheConfig;
use tile_cache::error::FetchError;
use tile_cache::source::TileSource;
use tile_cache::tile::{ImageFormat, TileBlob, TileKey};

/// Start time of every manual clock, in milliseconds.
pub const CLOCK_START: i64 = 1_700_000_000_000;

// =============================================================================
// Mock Tile Source with Fetch Tracking
// =============================================================================

/// A tile source that serves synthetic PNG tiles and records every fetch.
pub struct MockTileSource {
    cache_key: String,
    delay: Duration,
    failing: HashSet<(u8, u32, u32)>,
    fetch_count: AtomicUsize,
    fetched: Mutex<Vec<TileKey>>,
}

impl MockTileSource {
    pub fn new(cache_key: impl Into<String>) -> Self {
        Self {
            cache_key: cache_key.into(),
            delay: Duration::ZERO,
            failing: HashSet::new(),
            fetch_count: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make fetches of this tile fail.
    pub fn with_failure(mut self, zoom: u8, column: u32, row: u32) -> Self {
        self.failing.insert((zoom, column, row));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub async fn fetched(&self) -> Vec<TileKey> {
        self.fetched.lock().await.clone()
    }
}

#[async_trait]
impl TileSource for MockTileSource {
    fn cache_key(&self) -> &str {
        &self.cache_key
    }

    async fn fetch(&self, key: &TileKey) -> Result<TileBlob, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().await.push(key.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(&(key.zoom, key.column, key.row)) {
            return Err(FetchError::Source(format!("simulated failure for {}", key)));
        }

        Ok(png_tile(key))
    }
}

// =============================================================================
// Tile helpers
// =============================================================================

/// PNG-signed payload unique to the tile coordinates.
pub fn png_tile(key: &TileKey) -> TileBlob {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.push(key.zoom);
    data.extend_from_slice(&key.column.to_le_bytes());
    data.extend_from_slice(&key.row.to_le_bytes());
    TileBlob::new(data, ImageFormat::Png)
}

/// JPEG-signed payload of `size` bytes.
pub fn jpeg_tile(size: usize) -> TileBlob {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.resize(size.max(4), 0xAB);
    TileBlob::new(data, ImageFormat::Jpeg)
}

pub fn key(zoom: u8, column: u32, row: u32) -> TileKey {
    TileKey::new(zoom, column, row, "osm").unwrap()
}

// =============================================================================
// Store helpers
// =============================================================================

/// A store on a fresh temporary file, driven by a manual clock.
pub struct TestStore {
    pub store: Arc<PersistentTileStore>,
    pub clock: Arc<ManualClock>,
    pub dir: TempDir,
}

impl TestStore {
    pub fn open(config: CacheConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(CLOCK_START));
        let store = PersistentTileStore::open_with_clock(
            dir.path().join("tiles.sqlite"),
            config,
            clock.clone(),
        )
        .unwrap();

        Self {
            store: Arc::new(store),
            clock,
            dir,
        }
    }

    /// Advance the clock by one second.
    pub fn tick(&self) {
        self.clock.advance(Duration::from_secs(1));
    }
}
