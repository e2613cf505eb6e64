//! Two-tier cached tile service.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use common::config::CacheConfig;
use common::{GeoBounds, Result, TileGrid, TileKey, VenueSample};
use heatmap::{KdeEngine, RenderedTile, TileRenderer};
use tile_cache::{venue_hash, CacheStats, MemoryCache, TileStore};
use tracing::{debug, warn};

/// Outcome of re-rendering a batch of tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionReport {
    pub rendered: usize,
    pub failed: usize,
}

/// Serves PNG tiles and numeric grids through the memory and persistent tiers.
///
/// The persistent tier is optional. When it errors, lookups fall through to a
/// fresh render and writes are logged and dropped.
pub struct HeatmapService {
    renderer: TileRenderer,
    memory: Arc<MemoryCache>,
    store: Option<Arc<dyn TileStore>>,
    persistent_ttl: chrono::Duration,
}

impl HeatmapService {
    pub fn new(
        engine: Arc<KdeEngine>,
        memory: Arc<MemoryCache>,
        store: Option<Arc<dyn TileStore>>,
        cache: &CacheConfig,
    ) -> Self {
        let ttl_secs = cache.persistent_ttl_secs.min(i32::MAX as u64) as i64;
        Self {
            renderer: TileRenderer::new(engine),
            memory,
            store,
            persistent_ttl: chrono::Duration::seconds(ttl_secs),
        }
    }

    pub fn renderer(&self) -> &TileRenderer {
        &self.renderer
    }

    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.memory
    }

    pub fn store(&self) -> Option<&Arc<dyn TileStore>> {
        self.store.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        self.memory.stats()
    }

    /// Fetch a tile: memory tier, then persistent tier (only when its venue
    /// hash still matches), then a fresh render written through to both.
    pub async fn get_tile(&self, zoom: u8, x: u32, y: u32, venues: &[VenueSample]) -> Result<Bytes> {
        self.renderer.validate_tile(zoom, x, y)?;
        let key = TileKey::new(zoom, x, y);

        if let Some(data) = self.memory.get_tile(&key) {
            debug!("Memory hit for tile {}", key);
            return Ok(data);
        }

        let hash = venue_hash(venues);
        if let Some(store) = &self.store {
            match store.get(key).await {
                Ok(Some(tile)) if tile.is_valid(&hash, Utc::now()) => {
                    debug!("Persistent hit for tile {}", key);
                    self.memory.set_tile(key, tile.data.clone(), None);
                    if let Err(e) = store.record_hit(key).await {
                        warn!("Failed to record hit for tile {}: {}", key, e);
                    }
                    return Ok(tile.data);
                }
                Ok(Some(_)) => debug!("Persistent tile {} is stale", key),
                Ok(None) => {}
                Err(e) => warn!("Persistent lookup failed for tile {}: {}", key, e),
            }
        }

        self.render_and_store(key, venues, &hash).await
    }

    /// Re-render a tile unconditionally and overwrite both tiers.
    pub async fn refresh_tile(
        &self,
        zoom: u8,
        x: u32,
        y: u32,
        venues: &[VenueSample],
    ) -> Result<Bytes> {
        self.renderer.validate_tile(zoom, x, y)?;
        let hash = venue_hash(venues);
        self.render_and_store(TileKey::new(zoom, x, y), venues, &hash)
            .await
    }

    /// Re-render every tile covering `bounds` at `zoom` and write each one
    /// through to both tiers.
    pub async fn refresh_region(
        &self,
        venues: &[VenueSample],
        bounds: &GeoBounds,
        zoom: u8,
    ) -> Result<RegionReport> {
        self.renderer.validate_zoom(zoom)?;
        let hash = venue_hash(venues);
        let tiles = self.renderer.generate_tiles_for_region(venues, bounds, zoom);
        Ok(self.store_rendered(tiles, &hash).await)
    }

    /// Re-render the region at every zoom in `zoom_levels`. Unsupported zooms
    /// are skipped.
    pub async fn refresh_pyramid(
        &self,
        venues: &[VenueSample],
        bounds: &GeoBounds,
        zoom_levels: &[u8],
    ) -> RegionReport {
        let hash = venue_hash(venues);
        let tiles = self.renderer.precompute_tiles(venues, bounds, zoom_levels);
        self.store_rendered(tiles, &hash).await
    }

    /// Fetch the numeric grid for a tile, computing it on a memory miss.
    pub fn get_grid(&self, zoom: u8, x: u32, y: u32, venues: &[VenueSample]) -> Result<TileGrid> {
        self.renderer.validate_tile(zoom, x, y)?;
        let key = TileKey::new(zoom, x, y);
        if let Some(grid) = self.memory.get_grid(&key) {
            return Ok(grid);
        }
        let grid = self.renderer.get_grid(zoom, x, y, venues)?;
        self.memory.set_grid(key, grid.clone(), None);
        Ok(grid)
    }

    async fn render_and_store(
        &self,
        key: TileKey,
        venues: &[VenueSample],
        hash: &str,
    ) -> Result<Bytes> {
        let data = self.renderer.get_tile(key.zoom, key.x, key.y, venues)?;
        self.write_through(key, data.clone(), hash).await;
        Ok(data)
    }

    /// Write a batch of rendered tiles through to both tiers. A failed tile
    /// is counted and the batch moves on.
    async fn store_rendered<I>(&self, tiles: I, hash: &str) -> RegionReport
    where
        I: Iterator<Item = RenderedTile>,
    {
        let mut report = RegionReport::default();
        for tile in tiles {
            match tile.data {
                Ok(data) => {
                    self.write_through(tile.key, data, hash).await;
                    report.rendered += 1;
                }
                Err(_) => report.failed += 1,
            }
            tokio::task::yield_now().await;
        }
        report
    }

    async fn write_through(&self, key: TileKey, data: Bytes, hash: &str) {
        self.memory.set_tile(key, data.clone(), None);

        if let Some(store) = &self.store {
            let expires_at = Utc::now() + self.persistent_ttl;
            if let Err(e) = store.upsert(key, data, hash, expires_at).await {
                warn!("Failed to persist tile {}: {}", key, e);
            }
        }
    }

    /// Drop tiles from the memory tier ahead of their TTL.
    pub fn invalidate_memory(&self) {
        self.memory.clear();
    }
}
