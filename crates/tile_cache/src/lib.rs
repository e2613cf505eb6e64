//! Two-tier tile cache.
//!
//! A short-lived in-process tier backed by a persistent tile store whose
//! entries are validated against a hash of the venue occupancy that
//! produced them.

pub mod hash;
pub mod memory;
pub mod persistent;
pub mod sqlite;

pub use hash::venue_hash;
pub use memory::{CacheStats, MaintenanceReport, MemoryCache, TtlCache};
pub use persistent::{MemoryTileStore, StoredTile, TileStore};
pub use sqlite::SqliteTileStore;
