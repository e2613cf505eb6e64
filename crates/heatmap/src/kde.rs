//! Kernel density estimation over venue occupancy.
//!
//! Each active venue contributes an isotropic Gaussian whose mass is driven by
//! crowd size and percent-full, and whose spread grows with how full the venue
//! is. A per-zoom global maximum, refreshed every couple of minutes, rescales
//! tile output so that "hot" means the same thing on every tile.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::config::{KdeConfig, TileConfig};
use common::{GridCell, VenueSample};
use tracing::{debug, warn};

use crate::projection::{lng_lat_to_meters, meters_to_lng_lat, pixel_to_meters, tile_bounds};
use crate::spatial::{ProjectedVenue, SpatialIndex};

/// Kernel support in standard deviations; contributions beyond are dropped.
pub const SUPPORT_SIGMAS: f64 = 3.0;

/// Largest bloom multiplier, used to size spatial queries.
pub const MAX_BLOOM: f64 = 1.6;

/// Occupancy at which the absolute-crowd term reaches 1.0.
const CROWD_SCALE: f64 = 200.0;

// ── Per-venue model ───────────────────────────────────────────────────

/// Kernel mass for a venue: absolute crowd size blended with percent-full.
///
/// A venue with many people outweighs a tiny venue that is merely full.
pub fn venue_weight(venue: &VenueSample) -> f64 {
    let crowd = venue.occupancy as f64 / CROWD_SCALE;
    crowd * (0.5 + 0.5 * venue.occupancy_ratio())
}

/// Bandwidth multiplier by occupancy ratio. Busier venues glow larger.
pub fn bloom_multiplier(ratio: f64) -> f64 {
    if ratio < 0.3 {
        0.7
    } else if ratio < 0.6 {
        1.0
    } else if ratio < 0.9 {
        1.3
    } else {
        1.6
    }
}

/// Base Gaussian sigma in meters at `zoom`: halves per zoom level above the anchor.
pub fn base_bandwidth(zoom: u8, base_m: f64, anchor_zoom: u8) -> f64 {
    base_m * 2f64.powi(anchor_zoom as i32 - zoom as i32)
}

/// Weighted Gaussian density at squared distance `d2`, truncated at 3σ.
pub fn kernel(weight: f64, sigma: f64, d2: f64) -> f64 {
    let cutoff = SUPPORT_SIGMAS * sigma;
    if d2 > cutoff * cutoff {
        return 0.0;
    }
    let two_sigma2 = 2.0 * sigma * sigma;
    weight * (1.0 / (PI * two_sigma2)) * (-d2 / two_sigma2).exp()
}

/// Sum kernel contributions of `venues` at meter point `(mx, my)`.
///
/// `bandwidth` is the base sigma; each venue scales it by its bloom. The sum
/// is expressed in units of a unit-weight kernel's peak at the base sigma
/// (`1 / (2π·bandwidth²)`), so a lone venue peaks at `weight / bloom²`
/// at every zoom.
pub fn compute_intensity<'a>(
    mx: f64,
    my: f64,
    venues: impl IntoIterator<Item = &'a ProjectedVenue>,
    bandwidth: f64,
) -> f64 {
    let density: f64 = venues
        .into_iter()
        .map(|v| {
            let dx = v.x - mx;
            let dy = v.y - my;
            kernel(v.weight, bandwidth * v.bloom, dx * dx + dy * dy)
        })
        .sum();
    density * 2.0 * PI * bandwidth * bandwidth
}

// ── Engine ────────────────────────────────────────────────────────────

/// Running estimate of the highest intensity anywhere in the covered region.
#[derive(Debug, Clone, Copy)]
pub struct NormalizationState {
    pub global_max: f64,
    pub last_update: Instant,
}

impl NormalizationState {
    pub fn is_stale(&self, refresh: Duration) -> bool {
        self.global_max <= 0.0 || self.last_update.elapsed() > refresh
    }
}

struct IndexSlot {
    fingerprint: u64,
    index: Arc<SpatialIndex>,
}

/// Shared KDE engine. Safe to use from many tasks at once.
pub struct KdeEngine {
    kde: KdeConfig,
    tiles: TileConfig,
    index: Mutex<Option<IndexSlot>>,
    normalization: Mutex<HashMap<u8, NormalizationState>>,
}

impl KdeEngine {
    pub fn new(kde: KdeConfig, tiles: TileConfig) -> Self {
        Self {
            kde,
            tiles,
            index: Mutex::new(None),
            normalization: Mutex::new(HashMap::new()),
        }
    }

    pub fn tile_config(&self) -> &TileConfig {
        &self.tiles
    }

    pub fn bandwidth_for_zoom(&self, zoom: u8) -> f64 {
        base_bandwidth(zoom, self.kde.base_bandwidth_m, self.kde.anchor_zoom)
    }

    /// Spatial index for `venues`, rebuilt only when the venue set changed.
    pub fn index_for(&self, venues: &[VenueSample]) -> Arc<SpatialIndex> {
        let fingerprint = venue_fingerprint(venues);
        let mut slot = self.index.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = slot.as_ref() {
            if existing.fingerprint == fingerprint {
                return existing.index.clone();
            }
        }
        let index = Arc::new(SpatialIndex::build(venues, self.kde.cell_size_m));
        debug!(
            "Rebuilt spatial index: {} venues in {} cells",
            index.len(),
            index.cell_count()
        );
        *slot = Some(IndexSlot {
            fingerprint,
            index: index.clone(),
        });
        index
    }

    /// Intensity at `(mx, my)` using only venues near the point.
    pub fn compute_intensity_fast(
        &self,
        index: &SpatialIndex,
        mx: f64,
        my: f64,
        bandwidth: f64,
    ) -> f64 {
        let candidates = index.query(mx, my, bandwidth * MAX_BLOOM);
        compute_intensity(mx, my, candidates, bandwidth)
    }

    /// Current normalization state for `zoom`, if one has been computed.
    pub fn normalization(&self, zoom: u8) -> Option<NormalizationState> {
        self.normalization
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&zoom)
            .copied()
    }

    /// Global max intensity for `zoom`, recomputed when missing or stale.
    ///
    /// The lock is held across the recomputation so concurrent callers that
    /// find the state stale collapse into a single refresh.
    pub fn global_max(&self, zoom: u8, index: &SpatialIndex) -> f64 {
        let refresh = Duration::from_secs(self.kde.normalization_refresh_secs);
        let mut states = self.normalization.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get(&zoom) {
            if !state.is_stale(refresh) {
                return state.global_max;
            }
        }
        let global_max = self.estimate_global_max(zoom, index);
        states.insert(
            zoom,
            NormalizationState {
                global_max,
                last_update: Instant::now(),
            },
        );
        global_max
    }

    /// Force a normalization refresh for `zoom`.
    pub fn refresh_normalization(&self, zoom: u8, venues: &[VenueSample]) -> f64 {
        let index = self.index_for(venues);
        let global_max = self.estimate_global_max(zoom, &index);
        self.normalization
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                zoom,
                NormalizationState {
                    global_max,
                    last_update: Instant::now(),
                },
            );
        global_max
    }

    /// Sample every venue location (the likely local maxima) plus the
    /// configured anchor points and take the max, floored.
    fn estimate_global_max(&self, zoom: u8, index: &SpatialIndex) -> f64 {
        let bandwidth = self.bandwidth_for_zoom(zoom);
        let at_venues = index
            .venues()
            .iter()
            .map(|v| self.compute_intensity_fast(index, v.x, v.y, bandwidth));
        let at_anchors = self.kde.anchor_points.iter().map(|p| {
            let (mx, my) = lng_lat_to_meters(p.lng, p.lat);
            self.compute_intensity_fast(index, mx, my, bandwidth)
        });
        let max = at_venues.chain(at_anchors).fold(0.0_f64, f64::max);
        let global_max = max.max(self.kde.normalization_floor);
        debug!(
            "Normalization refreshed: zoom={} venues={} global_max={:.3e}",
            zoom,
            index.len(),
            global_max
        );
        global_max
    }

    /// Venues that can reach the tile, capped at `max_venues_per_tile`.
    ///
    /// Returns `None` when the shared index can be used as is.
    fn tile_local_index(
        &self,
        index: &SpatialIndex,
        zoom: u8,
        x: u32,
        y: u32,
    ) -> Option<SpatialIndex> {
        let reach = SUPPORT_SIGMAS * MAX_BLOOM * self.bandwidth_for_zoom(zoom);
        let area = tile_bounds(zoom, x, y).padded(reach);
        let mut nearby: Vec<ProjectedVenue> = index
            .venues()
            .iter()
            .filter(|v| area.contains(v.x, v.y))
            .cloned()
            .collect();
        if nearby.len() <= self.tiles.max_venues_per_tile {
            return None;
        }
        warn!(
            "Tile {}/{}/{} has {} contributing venues; keeping heaviest {}",
            zoom,
            x,
            y,
            nearby.len(),
            self.tiles.max_venues_per_tile
        );
        nearby.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        nearby.truncate(self.tiles.max_venues_per_tile);
        Some(SpatialIndex::from_projected(nearby, self.kde.cell_size_m))
    }

    /// Normalized, gamma-corrected intensities for every pixel of a tile,
    /// row-major from the north-west corner.
    ///
    /// KDE is evaluated every `sample_step` pixels on each axis (plus the last
    /// row/column) and the rest is bilinearly interpolated.
    pub fn compute_tile_intensities(
        &self,
        zoom: u8,
        x: u32,
        y: u32,
        venues: &[VenueSample],
    ) -> Vec<f32> {
        let shared = self.index_for(venues);
        let global_max = self.global_max(zoom, &shared);
        let local = self.tile_local_index(&shared, zoom, x, y);
        let index: &SpatialIndex = local.as_ref().unwrap_or(&*shared);

        let tile_size = self.tiles.tile_size;
        let size = tile_size as usize;
        let step = self.tiles.sample_step.max(1) as usize;
        let bandwidth = self.bandwidth_for_zoom(zoom);

        let mut positions: Vec<usize> = (0..size).step_by(step).collect();
        if positions.last() != Some(&(size - 1)) {
            positions.push(size - 1);
        }
        let n = positions.len();

        let mut samples = vec![0.0_f64; n * n];
        for (j, &py) in positions.iter().enumerate() {
            for (i, &px) in positions.iter().enumerate() {
                let (mx, my) = pixel_to_meters(zoom, x, y, px as f64, py as f64, tile_size);
                samples[j * n + i] = self.compute_intensity_fast(index, mx, my, bandwidth);
            }
        }

        // Per-axis bracketing samples and fractional offset for every pixel.
        let axis: Vec<(usize, usize, f64)> = (0..size)
            .map(|p| {
                let i0 = (p / step).min(n - 1);
                if positions[i0] == p || i0 + 1 >= n {
                    (i0, i0, 0.0)
                } else {
                    let i1 = i0 + 1;
                    let t = (p - positions[i0]) as f64 / (positions[i1] - positions[i0]) as f64;
                    (i0, i1, t)
                }
            })
            .collect();

        let gamma = self.tiles.gamma;
        let mut out = Vec::with_capacity(size * size);
        for &(j0, j1, ty) in &axis {
            for &(i0, i1, tx) in &axis {
                let s00 = samples[j0 * n + i0];
                let s10 = samples[j0 * n + i1];
                let s01 = samples[j1 * n + i0];
                let s11 = samples[j1 * n + i1];
                let raw = (1.0 - tx) * (1.0 - ty) * s00
                    + tx * (1.0 - ty) * s10
                    + (1.0 - tx) * ty * s01
                    + tx * ty * s11;
                let normalized = (raw / global_max).clamp(0.0, 1.0);
                out.push(normalized.powf(gamma) as f32);
            }
        }
        out
    }

    /// Exact intensity at the center of each cell of a `grid_size` square
    /// grid, clamped to `[0, 1]`.
    ///
    /// Unlike tile output this is not divided by the global max: grid values
    /// are raw kernel sums.
    pub fn compute_grid(
        &self,
        zoom: u8,
        x: u32,
        y: u32,
        venues: &[VenueSample],
        grid_size: u32,
    ) -> Vec<GridCell> {
        let index = self.index_for(venues);
        let bandwidth = self.bandwidth_for_zoom(zoom);
        let tile_size = self.tiles.tile_size;
        let cell_px = tile_size as f64 / grid_size.max(1) as f64;

        let mut cells = Vec::with_capacity((grid_size * grid_size) as usize);
        for j in 0..grid_size {
            for i in 0..grid_size {
                let px = (i as f64 + 0.5) * cell_px;
                let py = (j as f64 + 0.5) * cell_px;
                let (mx, my) = pixel_to_meters(zoom, x, y, px, py, tile_size);
                let (lng, lat) = meters_to_lng_lat(mx, my);
                let raw = self.compute_intensity_fast(&index, mx, my, bandwidth);
                cells.push(GridCell {
                    lat,
                    lng,
                    intensity: raw.clamp(0.0, 1.0),
                });
            }
        }
        cells
    }
}

/// Order-sensitive fingerprint of everything the spatial index depends on.
fn venue_fingerprint(venues: &[VenueSample]) -> u64 {
    let mut hasher = DefaultHasher::new();
    venues.len().hash(&mut hasher);
    for v in venues {
        v.id.hash(&mut hasher);
        v.lng.to_bits().hash(&mut hasher);
        v.lat.to_bits().hash(&mut hasher);
        v.capacity.hash(&mut hasher);
        v.occupancy.hash(&mut hasher);
    }
    hasher.finish()
}
