//! Durable store integration tests.
//!
//! Tests verify:
//! - Stored tiles come back byte-identical
//! - LRU and FIFO capacity purging evict the right tiles
//! - Read-only stores accept and ignore mutations
//! - Expiry removes tiles once their age reaches the period
//! - Concurrent writers never leave the store over capacity

use std::sync::Arc;
use std::time::Duration;

use tile_cache::cache::{CacheTier, PersistentTileStore};
use tile_cache::config::{CacheConfig, PurgeStrategy};
use tile_cache::tile::TileKey;

use super::test_utils::{jpeg_tile, key, png_tile, TestStore};

// =============================================================================
// Round-trip
// =============================================================================

#[tokio::test]
async fn test_store_then_lookup_returns_same_bytes() {
    let t = TestStore::open(CacheConfig::default());

    let keys = [key(0, 0, 0), key(5, 31, 0), key(12, 2047, 1362)];
    for k in &keys {
        t.store.store(k, &png_tile(k)).await.unwrap();
    }
    let big = key(3, 7, 7);
    t.store.store(&big, &jpeg_tile(64 * 1024)).await.unwrap();

    for k in &keys {
        assert_eq!(t.store.lookup(k).await.unwrap(), Some(png_tile(k)));
    }
    assert_eq!(t.store.lookup(&big).await.unwrap(), Some(jpeg_tile(64 * 1024)));
    assert_eq!(t.store.len(), 4);
}

// =============================================================================
// Capacity purging
// =============================================================================

#[tokio::test]
async fn test_lru_capacity_evicts_least_recently_used() {
    const CAPACITY: u32 = 5;
    let t = TestStore::open(
        CacheConfig::default()
            .with_purge_strategy(PurgeStrategy::Lru)
            .with_capacity(CAPACITY as u64),
    );

    for x in 0..CAPACITY {
        let k = key(4, x, 0);
        t.store.store(&k, &png_tile(&k)).await.unwrap();
        t.tick();
    }

    // Read everything except tile 2, so it becomes least recently used
    for x in [0, 1, 3, 4] {
        assert!(t.store.lookup(&key(4, x, 0)).await.unwrap().is_some());
        t.tick();
    }

    let extra = key(4, 10, 10);
    t.store.store(&extra, &png_tile(&extra)).await.unwrap();

    assert_eq!(t.store.len(), CAPACITY as u64);
    assert!(!t.store.contains(&key(4, 2, 0)).await.unwrap());
    for x in [0, 1, 3, 4] {
        assert!(t.store.contains(&key(4, x, 0)).await.unwrap());
    }
    assert!(t.store.contains(&extra).await.unwrap());
}

#[tokio::test]
async fn test_fifo_capacity_keeps_newest_regardless_of_access() {
    const CAPACITY: u32 = 4;
    const EXTRA: u32 = 3;
    let t = TestStore::open(
        CacheConfig::default()
            .with_purge_strategy(PurgeStrategy::Fifo)
            .with_capacity(CAPACITY as u64),
    );

    let keys: Vec<TileKey> = (0..CAPACITY + EXTRA).map(|x| key(5, x, 1)).collect();

    for (i, k) in keys.iter().enumerate() {
        t.store.store(k, &png_tile(k)).await.unwrap();
        t.tick();

        // Keep hammering the oldest tile; FIFO must ignore it
        if i >= 1 {
            t.store.lookup(&keys[0]).await.unwrap();
            t.tick();
        }
    }

    assert_eq!(t.store.len(), CAPACITY as u64);
    for k in &keys[..EXTRA as usize] {
        assert!(!t.store.contains(k).await.unwrap(), "{} should be evicted", k);
    }
    for k in &keys[EXTRA as usize..] {
        assert!(t.store.contains(k).await.unwrap(), "{} should remain", k);
    }
}

#[tokio::test]
async fn test_concurrent_writers_respect_capacity() {
    let t = TestStore::open(CacheConfig::default().with_capacity(16));

    let mut handles = Vec::new();
    for worker in 0..4u32 {
        let store = Arc::clone(&t.store);
        handles.push(tokio::spawn(async move {
            for i in 0..20u32 {
                let k = key(8, worker * 20 + i, worker);
                store.store(&k, &png_tile(&k)).await.unwrap();
                assert!(store.len() <= 16);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(t.store.len(), 16);
}

// =============================================================================
// Read-only bundles
// =============================================================================

#[tokio::test]
async fn test_read_only_bundle_is_immutable() {
    let t = TestStore::open(CacheConfig::default());
    let path = t.store.path().to_path_buf();

    let seeded: Vec<TileKey> = (0..3).map(|x| key(2, x, 1)).collect();
    for k in &seeded {
        t.store.store(k, &png_tile(k)).await.unwrap();
    }
    drop(t.store);

    let bundle =
        PersistentTileStore::open(&path, CacheConfig::default().with_read_only(true)).unwrap();

    let new = key(2, 3, 3);
    bundle.store(&new, &png_tile(&new)).await.unwrap();
    bundle.store(&seeded[0], &jpeg_tile(10)).await.unwrap();
    bundle.clear().await.unwrap();
    bundle.clear_for_cache_key("osm").await.unwrap();
    assert_eq!(bundle.purge().await.unwrap(), 0);

    assert_eq!(bundle.len(), 3);
    assert!(!bundle.contains(&new).await.unwrap());
    for k in &seeded {
        assert_eq!(bundle.lookup(k).await.unwrap(), Some(png_tile(k)));
    }
}

#[tokio::test]
async fn test_read_only_open_skips_capacity_purge() {
    let t = TestStore::open(CacheConfig::default());
    let path = t.store.path().to_path_buf();
    for x in 0..6 {
        let k = key(3, x, 0);
        t.store.store(&k, &png_tile(&k)).await.unwrap();
    }
    drop(t.store);

    let bundle = PersistentTileStore::open(
        &path,
        CacheConfig::default().with_read_only(true).with_capacity(2),
    )
    .unwrap();
    assert_eq!(bundle.len(), 6);
}

#[cfg(unix)]
#[tokio::test]
async fn test_read_only_bundle_on_write_protected_directory() {
    use std::os::unix::fs::PermissionsExt;

    let t = TestStore::open(CacheConfig::default());
    let path = t.store.path().to_path_buf();
    let seeded: Vec<TileKey> = (0..4).map(|x| key(3, x, 2)).collect();
    for k in &seeded {
        t.store.store(k, &png_tile(k)).await.unwrap();
    }
    drop(t.store);

    let dir = t.dir.path().to_path_buf();
    let sidecar = |suffix: &str| {
        let mut name = path.clone().into_os_string();
        name.push(suffix);
        std::path::PathBuf::from(name)
    };
    assert!(!sidecar("-wal").exists());

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o444)).unwrap();
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555)).unwrap();

    let opened = PersistentTileStore::open(&path, CacheConfig::default().with_read_only(true));
    let found = match &opened {
        Ok(bundle) => {
            let mut found = Vec::new();
            for k in &seeded {
                found.push(bundle.lookup(k).await.unwrap());
            }
            found
        }
        Err(_) => Vec::new(),
    };
    let shm_created = sidecar("-shm").exists();
    drop(opened);

    // Restore permissions so the temp dir can be removed
    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

    let expected: Vec<_> = seeded.iter().map(|k| Some(png_tile(k))).collect();
    assert_eq!(found, expected);
    assert!(!shm_created);
}

#[tokio::test]
async fn test_read_only_open_of_missing_file_creates_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("bundle.sqlite");

    let result = PersistentTileStore::open(&path, CacheConfig::default().with_read_only(true));

    assert!(result.is_err());
    assert!(!path.exists());
    assert!(!dir.path().join("nested").exists());
}

#[tokio::test]
async fn test_read_only_store_cannot_become_writable() {
    let t = TestStore::open(CacheConfig::default());
    let path = t.store.path().to_path_buf();
    drop(t.store);

    let bundle =
        PersistentTileStore::open(&path, CacheConfig::default().with_read_only(true)).unwrap();
    assert!(bundle.reconfigure(CacheConfig::default()).is_err());
    assert!(bundle.is_read_only());

    bundle.reopen().await.unwrap();
    assert!(bundle.is_empty());
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn test_expiry_boundary() {
    let period = Duration::from_secs(3600);
    let t = TestStore::open(CacheConfig::default().with_expiry_period(period));

    let k = key(6, 10, 20);
    t.store.store(&k, &png_tile(&k)).await.unwrap();

    // Just before T + P the tile survives a purge pass
    t.clock.advance(period - Duration::from_millis(1));
    t.store.purge().await.unwrap();
    assert!(t.store.lookup(&k).await.unwrap().is_some());

    // At T + P it is gone
    t.clock.advance(Duration::from_millis(1));
    t.store.purge().await.unwrap();
    assert!(t.store.lookup(&k).await.unwrap().is_none());
    assert!(t.store.is_empty());
}

#[tokio::test]
async fn test_expiry_runs_before_new_inserts() {
    let period = Duration::from_secs(60);
    let t = TestStore::open(CacheConfig::default().with_expiry_period(period));

    let old = key(6, 1, 1);
    t.store.store(&old, &png_tile(&old)).await.unwrap();

    t.clock.advance(period);
    let fresh = key(6, 2, 2);
    t.store.store(&fresh, &png_tile(&fresh)).await.unwrap();

    assert!(!t.store.contains(&old).await.unwrap());
    assert!(t.store.contains(&fresh).await.unwrap());
    assert_eq!(t.store.len(), 1);
}

#[tokio::test]
async fn test_lookup_does_not_extend_life_under_expiry() {
    let period = Duration::from_secs(60);
    let t = TestStore::open(CacheConfig::default().with_expiry_period(period));

    let k = key(6, 3, 3);
    t.store.store(&k, &png_tile(&k)).await.unwrap();

    t.clock.advance(Duration::from_secs(59));
    assert!(t.store.lookup(&k).await.unwrap().is_some());

    t.clock.advance(Duration::from_secs(1));
    t.store.purge().await.unwrap();
    assert!(t.store.lookup(&k).await.unwrap().is_none());
}
