//! Heat-map computation crate.
//!
//! Projects venues into Web-Mercator, estimates a busyness intensity field
//! with Gaussian kernels, and renders it into slippy-map tiles.

pub mod colormap;
pub mod kde;
pub mod projection;
pub mod renderer;
pub mod spatial;

pub use colormap::get_color;
pub use kde::{KdeEngine, NormalizationState};
pub use projection::{tile_range, TileRange};
pub use renderer::{RenderedTile, TileRenderer};
pub use spatial::SpatialIndex;
