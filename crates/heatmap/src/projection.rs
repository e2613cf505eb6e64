//! Web-Mercator projection math.
//!
//! Converts between lng/lat degrees, spherical Mercator meters, and
//! slippy-map tile/pixel coordinates. Inputs are assumed valid; latitudes
//! near ±90° diverge and must be clamped by the caller.

use std::f64::consts::PI;

use common::GeoBounds;

/// Sphere radius used by Web-Mercator (EPSG:3857).
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the world width in meters (`π · R`).
pub const ORIGIN_SHIFT: f64 = PI * EARTH_RADIUS;

/// Latitude limit of the square Web-Mercator world.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Meter-space bounding box of a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MeterBounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow the box by `margin` meters on every side.
    pub fn padded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Inclusive tile-index rectangle at one zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl TileRange {
    pub fn len(&self) -> usize {
        ((self.max_x - self.min_x + 1) as usize) * ((self.max_y - self.min_y + 1) as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tile coordinates in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..=self.max_y).flat_map(move |y| (min_x..=max_x).map(move |x| (x, y)))
    }
}

fn tiles_per_side(zoom: u8) -> f64 {
    2f64.powi(zoom as i32)
}

/// Whether `(x, y)` addresses a tile that exists at `zoom`.
pub fn tile_in_world(zoom: u8, x: u32, y: u32) -> bool {
    match 1u64.checked_shl(zoom as u32) {
        Some(side) => u64::from(x) < side && u64::from(y) < side,
        None => true,
    }
}

pub fn lng_lat_to_meters(lng: f64, lat: f64) -> (f64, f64) {
    let x = lng * ORIGIN_SHIFT / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() / (PI / 180.0);
    (x, y * ORIGIN_SHIFT / 180.0)
}

pub fn meters_to_lng_lat(x: f64, y: f64) -> (f64, f64) {
    let lng = x / ORIGIN_SHIFT * 180.0;
    let lat = y / ORIGIN_SHIFT * 180.0;
    let lat = 180.0 / PI * (2.0 * (lat * PI / 180.0).exp().atan() - PI / 2.0);
    (lng, lat)
}

/// Meter-space bounds of tile `(x, y)` at `zoom`. Row 0 is the northern edge.
///
/// Each edge is computed from its own tile index so neighbouring tiles share
/// bit-identical edges.
pub fn tile_bounds(zoom: u8, x: u32, y: u32) -> MeterBounds {
    let span = 2.0 * ORIGIN_SHIFT / tiles_per_side(zoom);
    let edge_x = |i: f64| -ORIGIN_SHIFT + i * span;
    let edge_y = |j: f64| ORIGIN_SHIFT - j * span;
    let (x, y) = (x as f64, y as f64);
    MeterBounds {
        min_x: edge_x(x),
        max_x: edge_x(x + 1.0),
        max_y: edge_y(y),
        min_y: edge_y(y + 1.0),
    }
}

/// Meter coordinates of pixel `(px, py)` inside a `tile_size` square tile.
pub fn pixel_to_meters(zoom: u8, x: u32, y: u32, px: f64, py: f64, tile_size: u32) -> (f64, f64) {
    let b = tile_bounds(zoom, x, y);
    let size = tile_size as f64;
    let mx = b.min_x + px / size * b.width();
    let my = b.max_y - py / size * b.height();
    (mx, my)
}

/// Slippy-map tile containing `(lng, lat)`, clamped to the valid index range.
pub fn lng_lat_to_tile(lng: f64, lat: f64, zoom: u8) -> (u32, u32) {
    let n = tiles_per_side(zoom);
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = ((lng + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();
    let max_index = n - 1.0;
    (x.clamp(0.0, max_index) as u32, y.clamp(0.0, max_index) as u32)
}

/// Lng/lat of the north-west corner of a tile.
pub fn tile_to_lng_lat(x: u32, y: u32, zoom: u8) -> (f64, f64) {
    let n = tiles_per_side(zoom);
    let lng = x as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y as f64 / n)).sinh().atan().to_degrees();
    (lng, lat)
}

/// Inclusive tile rectangle covering a lng/lat box.
pub fn tile_range(bounds: &GeoBounds, zoom: u8) -> TileRange {
    // North edge maps to the smallest row index.
    let (min_x, min_y) = lng_lat_to_tile(bounds.min_lng, bounds.max_lat, zoom);
    let (max_x, max_y) = lng_lat_to_tile(bounds.max_lng, bounds.min_lat, zoom);
    TileRange {
        zoom,
        min_x: min_x.min(max_x),
        max_x: min_x.max(max_x),
        min_y: min_y.min(max_y),
        max_y: min_y.max(max_y),
    }
}
