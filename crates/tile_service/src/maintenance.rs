//! Periodic cache housekeeping: memory TTL/size eviction and persistent purge.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tile_cache::{MaintenanceReport, MemoryCache, TileStore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
    pub tiles: MaintenanceReport,
    pub grids: MaintenanceReport,
    /// `None` when there is no persistent tier or the purge failed.
    pub purged: Option<usize>,
}

pub async fn run_maintenance(
    memory: &MemoryCache,
    store: Option<&Arc<dyn TileStore>>,
) -> MaintenanceSummary {
    let (tiles, grids) = memory.perform_maintenance();

    let purged = match store {
        Some(store) => match store.purge_expired(Utc::now()).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("Persistent tile purge failed: {}", e);
                None
            }
        },
        None => None,
    };

    MaintenanceSummary {
        tiles,
        grids,
        purged,
    }
}

/// Run `run_maintenance` every `interval` until the task is aborted.
pub fn spawn_maintenance_loop(
    memory: Arc<MemoryCache>,
    store: Option<Arc<dyn TileStore>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing to clean yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let summary = run_maintenance(&memory, store.as_ref()).await;
            info!(
                "Cache maintenance: tiles expired={} evicted={}, grids expired={} evicted={}, persistent purged={}",
                summary.tiles.expired,
                summary.tiles.evicted,
                summary.grids.expired,
                summary.grids.evicted,
                summary.purged.map_or_else(|| "-".to_string(), |n| n.to_string())
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::config::CacheConfig;
    use common::TileKey;
    use tile_cache::MemoryTileStore;

    #[tokio::test]
    async fn test_maintenance_evicts_and_purges() {
        let cfg = CacheConfig {
            max_tile_entries: 5,
            ..CacheConfig::default()
        };
        let memory = MemoryCache::new(&cfg);
        for x in 0..10 {
            memory.set_tile(TileKey::new(14, x, 0), Bytes::from_static(b"t"), None);
        }

        let store = Arc::new(MemoryTileStore::new());
        store
            .upsert(
                TileKey::new(14, 0, 0),
                Bytes::from_static(b"t"),
                "h",
                Utc::now() - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();
        let dyn_store: Arc<dyn TileStore> = store.clone();

        let summary = run_maintenance(&memory, Some(&dyn_store)).await;
        assert_eq!(summary.tiles.evicted, 2);
        assert_eq!(summary.purged, Some(1));
        assert!(store.is_empty());
        assert_eq!(memory.stats().tiles, 8);
    }

    #[tokio::test]
    async fn test_purge_failure_is_tolerated() {
        let memory = MemoryCache::new(&CacheConfig::default());
        let store = Arc::new(MemoryTileStore::new());
        store.set_unavailable(true);
        let dyn_store: Arc<dyn TileStore> = store;

        let summary = run_maintenance(&memory, Some(&dyn_store)).await;
        assert_eq!(summary.purged, None);
        assert_eq!(run_maintenance(&memory, None).await.purged, None);
    }
}
