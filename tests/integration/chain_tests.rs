//! Cache chain integration tests.
//!
//! Tests verify:
//! - Hits in the durable tier are promoted into memory
//! - Render-path fetch-through populates every tier once
//! - Tier membership can change while lookups are in flight

use std::sync::Arc;
use std::time::Duration;

use tile_cache::cache::{CacheChain, CacheTier, MemoryTier, TierHandle};
use tile_cache::config::CacheConfig;
use tile_cache::error::FetchError;

use super::test_utils::{key, png_tile, MockTileSource, TestStore};

#[tokio::test]
async fn test_memory_over_persistent_promotion() {
    let t = TestStore::open(CacheConfig::default());
    let memory = Arc::new(MemoryTier::with_capacity(2));
    let chain = CacheChain::new(vec![memory.clone().into(), t.store.clone().into()]);

    let k = key(7, 64, 42);
    t.store.store(&k, &png_tile(&k)).await.unwrap();
    assert!(!memory.contains(&k).await.unwrap());

    let (blob, origin) = chain.lookup_with_origin(&k).await.unwrap();
    assert_eq!(blob, png_tile(&k));
    assert_eq!(origin, 1);
    assert!(memory.contains(&k).await.unwrap());

    let (_, origin) = chain.lookup_with_origin(&k).await.unwrap();
    assert_eq!(origin, 0);
}

#[tokio::test]
async fn test_memory_eviction_falls_back_to_persistent() {
    let t = TestStore::open(CacheConfig::default());
    let memory = Arc::new(MemoryTier::with_capacity(2));
    let chain = CacheChain::new(vec![memory.clone().into(), t.store.clone().into()]);

    let keys = [key(3, 0, 0), key(3, 1, 0), key(3, 2, 0)];
    for k in &keys {
        chain.store(k, &png_tile(k)).await;
    }

    assert_eq!(memory.len().await, 2);
    assert_eq!(t.store.len(), 3);

    // The first tile was evicted from memory but still served
    let (blob, origin) = chain.lookup_with_origin(&keys[0]).await.unwrap();
    assert_eq!(blob, png_tile(&keys[0]));
    assert_eq!(origin, 1);
}

#[tokio::test]
async fn test_fetch_through_populates_chain_once() {
    let t = TestStore::open(CacheConfig::default());
    let memory = Arc::new(MemoryTier::new());
    let chain = CacheChain::new(vec![memory.clone().into(), t.store.clone().into()]);
    let source = MockTileSource::new("osm");

    let k = key(9, 300, 200);
    let first = chain.fetch_through(&source, &k).await.unwrap();
    let second = chain.fetch_through(&source, &k).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(source.fetch_count(), 1);
    assert!(memory.contains(&k).await.unwrap());
    assert!(t.store.contains(&k).await.unwrap());
}

#[tokio::test]
async fn test_fetch_through_failure_stores_nothing() {
    let memory = Arc::new(MemoryTier::new());
    let chain = CacheChain::new(vec![memory.clone().into()]);
    let source = MockTileSource::new("osm").with_failure(2, 1, 1);

    let err = chain.fetch_through(&source, &key(2, 1, 1)).await.unwrap_err();
    assert!(matches!(err, FetchError::Source(_)));
    assert!(memory.is_empty().await);
}

#[tokio::test]
async fn test_per_source_clear_across_tiers() {
    let t = TestStore::open(CacheConfig::default());
    let memory = Arc::new(MemoryTier::new());
    let chain = CacheChain::new(vec![memory.clone().into(), t.store.clone().into()]);

    let osm = MockTileSource::new("osm");
    let sat = MockTileSource::new("satellite");
    let osm_key = key(4, 2, 2);
    let sat_key = tile_cache::TileKey::new(4, 2, 2, "satellite").unwrap();

    chain.fetch_through(&osm, &osm_key).await.unwrap();
    chain.fetch_through(&sat, &sat_key).await.unwrap();

    chain.clear_for_cache_key("osm").await;

    assert!(!chain.contains(&osm_key).await);
    assert!(chain.contains(&sat_key).await);
    assert_eq!(t.store.len(), 1);
    assert_eq!(memory.len().await, 1);
}

#[tokio::test]
async fn test_membership_changes_during_lookups() {
    let t = TestStore::open(CacheConfig::default());
    let durable: TierHandle = t.store.clone().into();
    let chain = Arc::new(CacheChain::new(vec![durable.clone()]));

    for x in 0..32 {
        let k = key(6, x, 0);
        chain.store(&k, &png_tile(&k)).await;
    }

    let reader = {
        let chain = Arc::clone(&chain);
        tokio::spawn(async move {
            for round in 0..10 {
                for x in 0..32 {
                    let k = key(6, x, 0);
                    assert!(chain.lookup(&k).await.is_some(), "round {} tile {}", round, x);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    for _ in 0..10 {
        let memory: TierHandle = MemoryTier::with_capacity(8).into();
        chain.insert_tier_at(0, memory.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(chain.remove_tier(&memory));
    }

    reader.await.unwrap();
    assert_eq!(chain.len(), 1);
    assert!(chain.tiers()[0].same_tier(&durable));
}
