//! Tile renderer: KDE intensities → colored, blurred, PNG-encoded tiles.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use common::config::TileConfig;
use common::{Error, GeoBounds, Result, TileGrid, TileKey, VenueSample};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, Rgba, RgbaImage};
use tracing::{debug, warn};

use crate::colormap::get_color;
use crate::kde::KdeEngine;
use crate::projection::{tile_in_world, tile_range, TileRange};

/// One tile of a batch render. A failed tile carries its error so callers
/// can count it and move on.
#[derive(Debug)]
pub struct RenderedTile {
    pub key: TileKey,
    pub data: Result<Bytes>,
}

/// Renders raster tiles and numeric grids from the shared KDE engine.
#[derive(Clone)]
pub struct TileRenderer {
    engine: Arc<KdeEngine>,
    tiles: TileConfig,
}

impl TileRenderer {
    pub fn new(engine: Arc<KdeEngine>) -> Self {
        let tiles = engine.tile_config().clone();
        Self { engine, tiles }
    }

    pub fn engine(&self) -> &Arc<KdeEngine> {
        &self.engine
    }

    pub fn validate_zoom(&self, zoom: u8) -> Result<()> {
        if zoom < self.tiles.min_zoom || zoom > self.tiles.max_zoom {
            return Err(Error::ZoomOutOfRange {
                zoom,
                min: self.tiles.min_zoom,
                max: self.tiles.max_zoom,
            });
        }
        Ok(())
    }

    /// Zoom must be served and `x`, `y` must both be below `2^zoom`.
    pub fn validate_tile(&self, zoom: u8, x: u32, y: u32) -> Result<()> {
        self.validate_zoom(zoom)?;
        if !tile_in_world(zoom, x, y) {
            return Err(Error::TileOutOfRange { zoom, x, y });
        }
        Ok(())
    }

    /// Render one tile as PNG bytes.
    pub fn get_tile(&self, zoom: u8, x: u32, y: u32, venues: &[VenueSample]) -> Result<Bytes> {
        self.validate_tile(zoom, x, y)?;

        let size = self.tiles.tile_size;
        let intensities = self.engine.compute_tile_intensities(zoom, x, y, venues);

        let mut img = RgbaImage::new(size, size);
        for (pixel, &v) in img.pixels_mut().zip(intensities.iter()) {
            *pixel = Rgba(get_color(v as f64));
        }

        let sigma = self.tiles.gaussian_blur_sigma;
        if sigma > 0.0 {
            img = image::imageops::blur(&img, sigma);
        }

        encode_png(&img)
    }

    /// Coarse numeric grid for a tile. No image is rendered.
    pub fn get_grid(&self, zoom: u8, x: u32, y: u32, venues: &[VenueSample]) -> Result<TileGrid> {
        self.validate_tile(zoom, x, y)?;
        let cells = self
            .engine
            .compute_grid(zoom, x, y, venues, self.tiles.grid_size);
        Ok(TileGrid {
            zoom,
            x,
            y,
            cells,
            timestamp: Utc::now(),
        })
    }

    /// Render every tile covering `bounds` at `zoom`, one at a time in
    /// row-major order.
    ///
    /// A failing tile is logged and yielded with its error; the tiles after it
    /// still render. An unsupported zoom yields nothing.
    pub fn generate_tiles_for_region<'a>(
        &'a self,
        venues: &'a [VenueSample],
        bounds: &GeoBounds,
        zoom: u8,
    ) -> impl Iterator<Item = RenderedTile> + 'a {
        let range = match self.validate_zoom(zoom) {
            Ok(()) => {
                let range = tile_range(bounds, zoom);
                debug!(
                    "Rendering region at zoom {}: x={}..={} y={}..={} ({} tiles)",
                    zoom,
                    range.min_x,
                    range.max_x,
                    range.min_y,
                    range.max_y,
                    range.len()
                );
                Some(range)
            }
            Err(e) => {
                warn!("Skipping region: {}", e);
                None
            }
        };

        range
            .into_iter()
            .flat_map(|range: TileRange| range.iter())
            .map(move |(x, y)| {
                let data = self.get_tile(zoom, x, y, venues);
                if let Err(e) = &data {
                    warn!("Failed to render tile {}/{}/{}: {}", zoom, x, y, e);
                }
                RenderedTile {
                    key: TileKey::new(zoom, x, y),
                    data,
                }
            })
    }

    /// Render the region at each zoom level in turn.
    pub fn precompute_tiles<'a>(
        &'a self,
        venues: &'a [VenueSample],
        bounds: &'a GeoBounds,
        zoom_levels: &'a [u8],
    ) -> impl Iterator<Item = RenderedTile> + 'a {
        zoom_levels
            .iter()
            .flat_map(move |&zoom| self.generate_tiles_for_region(venues, bounds, zoom))
    }
}

/// Fast, lossless PNG encode; freshness matters more than bytes here.
fn encode_png(img: &RgbaImage) -> Result<Bytes> {
    let mut buf = Vec::new();
    PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::Adaptive)
        .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgba8)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::lng_lat_to_tile;
    use common::config::KdeConfig;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn venue(id: &str, lng: f64, lat: f64, capacity: u32, occupancy: u32) -> VenueSample {
        VenueSample {
            id: id.into(),
            lng,
            lat,
            capacity,
            occupancy,
            rating: None,
        }
    }

    fn renderer(tile_size: u32) -> TileRenderer {
        let tiles = TileConfig {
            tile_size,
            ..TileConfig::default()
        };
        TileRenderer::new(Arc::new(KdeEngine::new(KdeConfig::default(), tiles)))
    }

    #[test]
    fn test_tile_is_png_for_every_valid_zoom() {
        let r = renderer(32);
        let venues = vec![venue("a", 153.0, -27.47, 200, 180)];
        for zoom in 11..=20 {
            let (x, y) = lng_lat_to_tile(153.0, -27.47, zoom);
            let png = r.get_tile(zoom, x, y, &venues).expect("render");
            assert!(png.len() > PNG_MAGIC.len());
            assert_eq!(&png[..8], &PNG_MAGIC);
        }
    }

    #[test]
    fn test_zoom_out_of_range_rejected() {
        let r = renderer(32);
        for zoom in [0u8, 10, 21, 30] {
            let err = r.get_tile(zoom, 0, 0, &[]).unwrap_err();
            assert!(matches!(err, Error::ZoomOutOfRange { .. }), "zoom {}", zoom);
            assert!(r.get_grid(zoom, 0, 0, &[]).is_err());
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let r = renderer(64);
        let venues = vec![
            venue("a", 153.0, -27.47, 200, 180),
            venue("b", 153.003, -27.469, 120, 45),
        ];
        let (x, y) = lng_lat_to_tile(153.0, -27.47, 15);
        let first = r.get_tile(15, x, y, &venues).unwrap();
        let second = r.get_tile(15, x, y, &venues).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_venues_render_transparent_tile() {
        let r = renderer(32);
        let png = r.get_tile(14, 15142, 9513, &[]).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (32, 32));
        assert!(decoded.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_busy_tile_has_opaque_center() {
        let r = renderer(64);
        let venues = vec![venue("a", 153.0, -27.47, 200, 180)];
        let (x, y) = lng_lat_to_tile(153.0, -27.47, 14);
        let png = r.get_tile(14, x, y, &venues).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        let max_alpha = decoded.pixels().map(|p| p.0[3]).max().unwrap();
        assert!(max_alpha > 150, "max alpha {}", max_alpha);
    }

    #[test]
    fn test_grid_shape() {
        let r = renderer(32);
        let grid = r.get_grid(14, 15142, 9513, &[]).unwrap();
        assert_eq!((grid.zoom, grid.x, grid.y), (14, 15142, 9513));
        assert_eq!(grid.cells.len(), 16 * 16);
    }

    #[test]
    fn test_tile_outside_world_rejected() {
        let r = renderer(16);
        let side = 1u32 << 14;
        for (x, y) in [(side, 0), (0, side), (u32::MAX, u32::MAX)] {
            let err = r.get_tile(14, x, y, &[]).unwrap_err();
            assert!(matches!(err, Error::TileOutOfRange { zoom: 14, .. }));
            assert!(err.is_client_error());
            assert!(r.get_grid(14, x, y, &[]).is_err());
        }
        assert!(r.get_tile(14, side - 1, side - 1, &[]).is_ok());
    }

    #[test]
    fn test_region_covers_tile_range() {
        let r = renderer(16);
        let bounds = GeoBounds {
            min_lng: 153.0,
            min_lat: -27.48,
            max_lng: 153.02,
            max_lat: -27.46,
        };
        let venues = vec![venue("a", 153.01, -27.47, 200, 100)];
        let tiles: Vec<RenderedTile> = r.generate_tiles_for_region(&venues, &bounds, 13).collect();
        assert_eq!(tiles.len(), tile_range(&bounds, 13).len());
        assert!(tiles.iter().all(|t| t.data.is_ok() && t.key.zoom == 13));

        let all = r.precompute_tiles(&venues, &bounds, &[12, 13]).count();
        assert_eq!(
            all,
            tile_range(&bounds, 12).len() + tile_range(&bounds, 13).len()
        );
    }

    #[test]
    fn test_region_skips_out_of_range_zoom() {
        let r = renderer(16);
        let bounds = GeoBounds {
            min_lng: 152.98,
            min_lat: -27.50,
            max_lng: 153.06,
            max_lat: -27.44,
        };
        for zoom in [5u8, 30, 64, u8::MAX] {
            assert_eq!(r.generate_tiles_for_region(&[], &bounds, zoom).count(), 0);
        }
    }

    #[test]
    fn test_precompute_continues_past_unsupported_zoom() {
        let r = renderer(16);
        let bounds = GeoBounds {
            min_lng: 153.0,
            min_lat: -27.48,
            max_lng: 153.02,
            max_lat: -27.46,
        };
        let venues = vec![venue("a", 153.01, -27.47, 200, 100)];
        let tiles: Vec<RenderedTile> = r.precompute_tiles(&venues, &bounds, &[9, 13, 25]).collect();
        assert_eq!(tiles.len(), tile_range(&bounds, 13).len());
        assert!(tiles.iter().all(|t| t.key.zoom == 13 && t.data.is_ok()));
    }
}
