//! Venue occupancy sources.
//!
//! The heat-map core only ever reads venues; occupancy is owned by the
//! store. Every read returns active venues only (`capacity > 0` and
//! `occupancy > 0`).

pub mod sqlite;
pub mod static_store;

use async_trait::async_trait;
use common::{Result, VenueSample};

pub use sqlite::SqliteVenueStore;
pub use static_store::StaticVenueStore;

/// Read access to current venue occupancy.
#[async_trait]
pub trait VenueStore: Send + Sync {
    async fn list_active_venues(&self) -> Result<Vec<VenueSample>>;
}

/// Drop venues that cannot contribute to the heat map.
pub fn retain_active(mut venues: Vec<VenueSample>) -> Vec<VenueSample> {
    venues.retain(VenueSample::is_active);
    venues
}
