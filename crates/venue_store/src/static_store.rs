//! Venue store held in memory, optionally seeded from a JSON file.

use std::path::Path;

use async_trait::async_trait;
use common::{Result, VenueSample};
use tokio::sync::RwLock;
use tracing::info;

use crate::{retain_active, VenueStore};

/// A swappable in-memory venue list.
#[derive(Debug, Default)]
pub struct StaticVenueStore {
    venues: RwLock<Vec<VenueSample>>,
}

impl StaticVenueStore {
    pub fn new(venues: Vec<VenueSample>) -> Self {
        Self {
            venues: RwLock::new(venues),
        }
    }

    /// Load a JSON array of venue samples.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let venues: Vec<VenueSample> = serde_json::from_str(&contents)?;
        info!("Loaded {} venues from {}", venues.len(), path.display());
        Ok(Self::new(venues))
    }

    /// Replace the whole venue list.
    pub async fn set_venues(&self, venues: Vec<VenueSample>) {
        *self.venues.write().await = venues;
    }
}

#[async_trait]
impl VenueStore for StaticVenueStore {
    async fn list_active_venues(&self) -> Result<Vec<VenueSample>> {
        Ok(retain_active(self.venues.read().await.clone()))
    }
}
