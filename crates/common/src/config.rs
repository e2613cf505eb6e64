//! Heat-map server configuration types.

use serde::{Deserialize, Serialize};

use crate::types::{GeoBounds, GeoPoint};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapConfig {
    /// SQLite file holding venue rows and persisted tile blobs.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Tile rendering parameters.
    #[serde(default)]
    pub tiles: TileConfig,

    /// Kernel density estimation parameters.
    #[serde(default)]
    pub kde: KdeConfig,

    /// Memory and persistent cache parameters.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background precompute parameters.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Tile rendering parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileConfig {
    /// Lowest zoom served.
    #[serde(default = "default_min_zoom")]
    pub min_zoom: u8,

    /// Highest zoom served.
    #[serde(default = "default_max_zoom")]
    pub max_zoom: u8,

    /// Tile edge length in pixels.
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,

    /// Gamma applied to normalized intensity. Lower = more contrast in the quiet range.
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Sigma of the post-render Gaussian blur, in pixels. 0 disables the blur.
    #[serde(default = "default_blur_sigma")]
    pub gaussian_blur_sigma: f32,

    /// Pixel stride for exact KDE evaluation; skipped pixels are interpolated.
    #[serde(default = "default_sample_step")]
    pub sample_step: u32,

    /// Cells per side of the coarse numeric grid.
    #[serde(default = "default_grid_size")]
    pub grid_size: u32,

    /// Max venues considered for a single tile (heaviest kept).
    #[serde(default = "default_max_venues_per_tile")]
    pub max_venues_per_tile: usize,
}

/// Kernel density estimation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdeConfig {
    /// Gaussian sigma in meters at `anchor_zoom`.
    #[serde(default = "default_base_bandwidth")]
    pub base_bandwidth_m: f64,

    /// Zoom at which `base_bandwidth_m` applies; halves per zoom level above.
    #[serde(default = "default_anchor_zoom")]
    pub anchor_zoom: u8,

    /// Spatial index cell size in meters.
    #[serde(default = "default_cell_size")]
    pub cell_size_m: f64,

    /// Max age of the global normalization constant before it is recomputed.
    #[serde(default = "default_normalization_refresh")]
    pub normalization_refresh_secs: u64,

    /// Lower bound of the normalization constant, in base-kernel peak units
    /// (a lone venue peaks at `weight / bloom²`, typically 0.01 to 1).
    #[serde(default = "default_normalization_floor")]
    pub normalization_floor: f64,

    /// Extra points sampled when estimating the global max intensity.
    #[serde(default = "default_anchor_points")]
    pub anchor_points: Vec<GeoPoint>,
}

/// Cache parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory-tier TTL for rendered tiles.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Memory-tier TTL for numeric grids.
    #[serde(default = "default_grid_ttl")]
    pub grid_ttl_secs: u64,

    /// Persistent-tier TTL for tile blobs.
    #[serde(default = "default_persistent_ttl")]
    pub persistent_ttl_secs: u64,

    /// Tile entry ceiling before size-based eviction.
    #[serde(default = "default_max_tile_entries")]
    pub max_tile_entries: usize,

    /// Grid entry ceiling before size-based eviction.
    #[serde(default = "default_max_grid_entries")]
    pub max_grid_entries: usize,

    /// Interval of the maintenance sweep.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,

    /// Fraction of oldest entries evicted when a ceiling is exceeded.
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,
}

/// Background precompute parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between full pyramid sweeps.
    #[serde(default = "default_tile_update_interval")]
    pub tile_update_interval_secs: u64,

    /// Zoom levels to precompute. Empty = every zoom in `tiles.min_zoom..=tiles.max_zoom`.
    #[serde(default)]
    pub zoom_levels: Vec<u8>,

    /// Region covered by the sweep.
    #[serde(default = "default_bounds")]
    pub bounds: GeoBounds,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_database_path() -> String {
    "heatmap.db".into()
}

fn default_min_zoom() -> u8 {
    11
}
fn default_max_zoom() -> u8 {
    20
}
fn default_tile_size() -> u32 {
    256
}
fn default_gamma() -> f64 {
    0.75
}
fn default_blur_sigma() -> f32 {
    1.5
}
fn default_sample_step() -> u32 {
    2
}
fn default_grid_size() -> u32 {
    16
}
fn default_max_venues_per_tile() -> usize {
    500
}

fn default_base_bandwidth() -> f64 {
    300.0
}
fn default_anchor_zoom() -> u8 {
    14
}
fn default_cell_size() -> f64 {
    1000.0
}
fn default_normalization_refresh() -> u64 {
    120
}
fn default_normalization_floor() -> f64 {
    0.001
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_grid_ttl() -> u64 {
    60
}
fn default_persistent_ttl() -> u64 {
    1800
}
fn default_max_tile_entries() -> usize {
    1000
}
fn default_max_grid_entries() -> usize {
    5000
}
fn default_maintenance_interval() -> u64 {
    300
}
fn default_eviction_fraction() -> f64 {
    0.2
}

fn default_tile_update_interval() -> u64 {
    900
}

/// Brisbane CBD, Fortitude Valley and West End.
fn default_bounds() -> GeoBounds {
    GeoBounds {
        min_lng: 152.98,
        min_lat: -27.50,
        max_lng: 153.06,
        max_lat: -27.44,
    }
}

fn default_anchor_points() -> Vec<GeoPoint> {
    vec![
        // Fortitude Valley
        GeoPoint {
            lng: 153.0351,
            lat: -27.4572,
        },
        // CBD
        GeoPoint {
            lng: 153.0260,
            lat: -27.4698,
        },
        // West End
        GeoPoint {
            lng: 153.0090,
            lat: -27.4810,
        },
        // South Bank
        GeoPoint {
            lng: 153.0230,
            lat: -27.4765,
        },
    ]
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            tile_size: default_tile_size(),
            gamma: default_gamma(),
            gaussian_blur_sigma: default_blur_sigma(),
            sample_step: default_sample_step(),
            grid_size: default_grid_size(),
            max_venues_per_tile: default_max_venues_per_tile(),
        }
    }
}

impl Default for KdeConfig {
    fn default() -> Self {
        Self {
            base_bandwidth_m: default_base_bandwidth(),
            anchor_zoom: default_anchor_zoom(),
            cell_size_m: default_cell_size(),
            normalization_refresh_secs: default_normalization_refresh(),
            normalization_floor: default_normalization_floor(),
            anchor_points: default_anchor_points(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            grid_ttl_secs: default_grid_ttl(),
            persistent_ttl_secs: default_persistent_ttl(),
            max_tile_entries: default_max_tile_entries(),
            max_grid_entries: default_max_grid_entries(),
            maintenance_interval_secs: default_maintenance_interval(),
            eviction_fraction: default_eviction_fraction(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tile_update_interval_secs: default_tile_update_interval(),
            zoom_levels: Vec::new(),
            bounds: default_bounds(),
        }
    }
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            tiles: TileConfig::default(),
            kde: KdeConfig::default(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl HeatmapConfig {
    /// Zoom levels swept by the precompute scheduler.
    pub fn precompute_zooms(&self) -> Vec<u8> {
        if self.scheduler.zoom_levels.is_empty() {
            (self.tiles.min_zoom..=self.tiles.max_zoom).collect()
        } else {
            self.scheduler.zoom_levels.clone()
        }
    }
}
