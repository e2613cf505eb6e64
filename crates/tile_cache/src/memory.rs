//! In-process TTL caches for rendered tiles and numeric grids.
//!
//! Uses `DashMap` so interactive requests and the precompute sweep can read
//! and write concurrently without a global lock.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::config::CacheConfig;
use common::{TileGrid, TileKey};
use dashmap::DashMap;
use tracing::debug;

/// A cached value with insertion and expiry timestamps.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

/// What a maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
}

/// A concurrent map with per-entry TTL and a size ceiling.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    max_entries: usize,
    counters: Counters,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            max_entries,
            counters: Counters::default(),
        }
    }

    /// Look up `key`, first dropping every expired entry in the cache.
    pub fn get(&self, key: &K) -> Option<V> {
        self.purge_expired();
        match self.entries.get(key) {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value`, silently replacing any existing entry.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Purge expired entries, then if still over the ceiling evict the
    /// oldest `fraction` of entries by insertion time, expired or not.
    pub fn perform_maintenance(&self, fraction: f64) -> MaintenanceReport {
        let expired = self.purge_expired();
        let len = self.entries.len();
        if len <= self.max_entries {
            return MaintenanceReport { expired, evicted: 0 };
        }

        let to_evict = ((len as f64 * fraction).ceil() as usize).clamp(1, len);
        let mut by_age: Vec<(K, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().inserted_at))
            .collect();
        by_age.sort_by_key(|(_, inserted_at)| *inserted_at);

        let mut evicted = 0;
        for (key, _) in by_age.into_iter().take(to_evict) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        MaintenanceReport { expired, evicted }
    }

    pub fn hits(&self) -> u64 {
        self.counters.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.counters.sets.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.counters.evictions.load(Ordering::Relaxed)
    }
}

// ── Tile + grid cache ─────────────────────────────────────────────────

/// Snapshot of memory-tier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub clears: u64,
    pub evictions: u64,
    pub tiles: usize,
    pub grids: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Memory tier: rendered tiles and computed grids, each with its own TTL and ceiling.
#[derive(Debug)]
pub struct MemoryCache {
    tiles: TtlCache<TileKey, Bytes>,
    grids: TtlCache<TileKey, TileGrid>,
    eviction_fraction: f64,
    clears: AtomicU64,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            tiles: TtlCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.max_tile_entries,
            ),
            grids: TtlCache::new(
                Duration::from_secs(config.grid_ttl_secs),
                config.max_grid_entries,
            ),
            eviction_fraction: config.eviction_fraction,
            clears: AtomicU64::new(0),
        }
    }

    pub fn get_tile(&self, key: &TileKey) -> Option<Bytes> {
        self.tiles.get(key)
    }

    pub fn set_tile(&self, key: TileKey, data: Bytes, ttl: Option<Duration>) {
        self.tiles.set(key, data, ttl);
    }

    pub fn get_grid(&self, key: &TileKey) -> Option<TileGrid> {
        self.grids.get(key)
    }

    pub fn set_grid(&self, key: TileKey, grid: TileGrid, ttl: Option<Duration>) {
        self.grids.set(key, grid, ttl);
    }

    /// Wipe both tiers of the memory cache.
    pub fn clear(&self) {
        self.tiles.clear();
        self.grids.clear();
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    pub fn clear_tiles(&self) {
        self.tiles.clear();
    }

    pub fn clear_data(&self) {
        self.grids.clear();
    }

    pub fn perform_maintenance(&self) -> (MaintenanceReport, MaintenanceReport) {
        let tiles = self.tiles.perform_maintenance(self.eviction_fraction);
        let grids = self.grids.perform_maintenance(self.eviction_fraction);
        debug!(
            "Memory cache maintenance: tiles expired={} evicted={}, grids expired={} evicted={}",
            tiles.expired, tiles.evicted, grids.expired, grids.evicted
        );
        (tiles, grids)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.tiles.hits() + self.grids.hits(),
            misses: self.tiles.misses() + self.grids.misses(),
            sets: self.tiles.sets() + self.grids.sets(),
            clears: self.clears.load(Ordering::Relaxed),
            evictions: self.tiles.evictions() + self.grids.evictions(),
            tiles: self.tiles.len(),
            grids: self.grids.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn key(x: u32) -> TileKey {
        TileKey::new(14, x, 100)
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache: TtlCache<TileKey, Bytes> = TtlCache::new(Duration::from_secs(60), 10);
        cache.set(key(1), Bytes::from_static(b"png"), Some(Duration::from_millis(100)));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(cache.get(&key(1)), None);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn test_hit_and_overwrite() {
        let cache: TtlCache<TileKey, u32> = TtlCache::new(Duration::from_secs(60), 10);
        cache.set(key(1), 1, None);
        cache.set(key(1), 2, None);
        assert_eq!(cache.get(&key(1)), Some(2));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.sets(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_purges_other_expired_entries() {
        let cache: TtlCache<TileKey, u32> = TtlCache::new(Duration::from_secs(60), 10);
        cache.set(key(1), 1, Some(Duration::from_millis(10)));
        cache.set(key(2), 2, None);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&key(2)), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_maintenance_evicts_oldest_fifth() {
        let cache: TtlCache<TileKey, u32> = TtlCache::new(Duration::from_secs(60), 10);
        for x in 0..12 {
            cache.set(key(x), x, None);
            std::thread::sleep(Duration::from_millis(2));
        }
        let report = cache.perform_maintenance(0.2);
        // ceil(12 * 0.2) = 3 oldest entries go.
        assert_eq!(report, MaintenanceReport { expired: 0, evicted: 3 });
        assert_eq!(cache.len(), 9);
        for x in 0..3 {
            assert!(cache.get(&key(x)).is_none());
        }
        assert_eq!(cache.get(&key(3)), Some(3));
        assert_eq!(cache.evictions(), 3);
    }

    #[test]
    fn test_maintenance_under_ceiling_only_purges() {
        let cache: TtlCache<TileKey, u32> = TtlCache::new(Duration::from_secs(60), 10);
        cache.set(key(1), 1, Some(Duration::from_millis(5)));
        cache.set(key(2), 2, None);
        std::thread::sleep(Duration::from_millis(20));
        let report = cache.perform_maintenance(0.2);
        assert_eq!(report, MaintenanceReport { expired: 1, evicted: 0 });
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_memory_cache_clear_variants() {
        let cache = MemoryCache::new(&CacheConfig::default());
        let grid = TileGrid {
            zoom: 14,
            x: 1,
            y: 100,
            cells: Vec::new(),
            timestamp: Utc::now(),
        };
        cache.set_tile(key(1), Bytes::from_static(b"png"), None);
        cache.set_grid(key(1), grid.clone(), None);

        cache.clear_tiles();
        assert!(cache.get_tile(&key(1)).is_none());
        assert_eq!(cache.get_grid(&key(1)), Some(grid.clone()));

        cache.set_tile(key(1), Bytes::from_static(b"png"), None);
        cache.clear_data();
        assert!(cache.get_grid(&key(1)).is_none());
        assert!(cache.get_tile(&key(1)).is_some());
        assert_eq!(cache.stats().clears, 0);

        cache.set_grid(key(1), grid, None);
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.clears, 1);
        assert_eq!((stats.tiles, stats.grids), (0, 0));
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = MemoryCache::new(&CacheConfig::default());
        assert_eq!(cache.stats().hit_rate(), 0.0);
        cache.set_tile(key(1), Bytes::from_static(b"png"), None);
        cache.get_tile(&key(1));
        cache.get_tile(&key(2));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
    }
}
