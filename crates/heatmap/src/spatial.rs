//! Uniform-grid spatial index over active venues.
//!
//! Venues are bucketed by meter-space cell so the KDE hot path only visits
//! venues near the pixel being evaluated. The grid is rebuilt in full
//! whenever the venue set changes; there is no incremental update.

use std::collections::HashMap;

use common::VenueSample;

use crate::kde::{bloom_multiplier, venue_weight, SUPPORT_SIGMAS};
use crate::projection::lng_lat_to_meters;

/// A venue with its projected position and precomputed kernel parameters.
#[derive(Debug, Clone)]
pub struct ProjectedVenue {
    pub venue: VenueSample,
    /// Web-Mercator x in meters.
    pub x: f64,
    /// Web-Mercator y in meters.
    pub y: f64,
    pub weight: f64,
    pub bloom: f64,
}

impl ProjectedVenue {
    pub fn new(venue: VenueSample) -> Self {
        let (x, y) = lng_lat_to_meters(venue.lng, venue.lat);
        let weight = venue_weight(&venue);
        let bloom = bloom_multiplier(venue.occupancy_ratio());
        Self {
            venue,
            x,
            y,
            weight,
            bloom,
        }
    }
}

/// Venues bucketed by `(floor(x / cell), floor(y / cell))`.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: f64,
    venues: Vec<ProjectedVenue>,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl SpatialIndex {
    /// Build the index, dropping venues with no occupancy.
    pub fn build(venues: &[VenueSample], cell_size: f64) -> Self {
        let venues: Vec<ProjectedVenue> = venues
            .iter()
            .filter(|v| v.occupancy > 0)
            .cloned()
            .map(ProjectedVenue::new)
            .collect();
        Self::from_projected(venues, cell_size)
    }

    /// Build from venues that are already projected, e.g. a per-tile subset.
    pub fn from_projected(venues: Vec<ProjectedVenue>, cell_size: f64) -> Self {
        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, v) in venues.iter().enumerate() {
            cells
                .entry(cell_of(v.x, v.y, cell_size))
                .or_default()
                .push(i);
        }

        Self {
            cell_size,
            venues,
            cells,
        }
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }

    pub fn venues(&self) -> &[ProjectedVenue] {
        &self.venues
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Venues in every cell within `ceil(3 · bandwidth / cell)` cells of the
    /// point's cell.
    ///
    /// The result is a superset of the venues within `3 · bandwidth`; callers
    /// re-filter by exact distance. Each venue appears at most once.
    pub fn query(&self, mx: f64, my: f64, bandwidth: f64) -> Vec<&ProjectedVenue> {
        let radius = SUPPORT_SIGMAS * bandwidth;
        let reach = (radius / self.cell_size).ceil() as i64;
        let (cx, cy) = cell_of(mx, my, self.cell_size);

        let mut out = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                if let Some(bucket) = self.cells.get(&(cx + dx, cy + dy)) {
                    out.extend(bucket.iter().map(|&i| &self.venues[i]));
                }
            }
        }
        out
    }
}

fn cell_of(x: f64, y: f64, cell_size: f64) -> (i64, i64) {
    ((x / cell_size).floor() as i64, (y / cell_size).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::meters_to_lng_lat;

    fn venue_at_meters(id: &str, x: f64, y: f64, occupancy: u32) -> VenueSample {
        let (lng, lat) = meters_to_lng_lat(x, y);
        VenueSample {
            id: id.into(),
            lng,
            lat,
            capacity: 100,
            occupancy,
            rating: None,
        }
    }

    #[test]
    fn test_build_drops_empty_venues() {
        let venues = vec![
            venue_at_meters("a", 100.0, 100.0, 10),
            venue_at_meters("b", 200.0, 200.0, 0),
        ];
        let index = SpatialIndex::build(&venues, 1000.0);
        assert_eq!(index.len(), 1);
        assert_eq!(index.venues()[0].venue.id, "a");
    }

    #[test]
    fn test_negative_coordinates_bucket_by_floor() {
        let venues = vec![
            venue_at_meters("w", -10.0, 10.0, 5),
            venue_at_meters("e", 10.0, 10.0, 5),
        ];
        let index = SpatialIndex::build(&venues, 1000.0);
        assert_eq!(index.cell_count(), 2);
    }

    #[test]
    fn test_query_is_superset_of_true_neighbours() {
        // Deterministic scatter over a 20 km square.
        let mut venues = Vec::new();
        let mut seed: u64 = 42;
        for i in 0..400 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let x = ((seed >> 33) % 20_000) as f64 - 10_000.0;
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let y = ((seed >> 33) % 20_000) as f64 - 10_000.0;
            venues.push(venue_at_meters(&format!("v{}", i), x, y, 20));
        }
        let index = SpatialIndex::build(&venues, 1000.0);

        for (qx, qy, bw) in [(0.0, 0.0, 300.0), (-4_321.0, 987.0, 150.0), (7_500.0, -7_500.0, 1_200.0)] {
            let found: Vec<&str> = index
                .query(qx, qy, bw)
                .iter()
                .map(|v| v.venue.id.as_str())
                .collect();
            for v in index.venues() {
                let d = ((v.x - qx).powi(2) + (v.y - qy).powi(2)).sqrt();
                if d <= 3.0 * bw {
                    assert!(found.contains(&v.venue.id.as_str()), "missed {}", v.venue.id);
                }
            }
            let mut unique = found.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), found.len(), "duplicates in query result");
        }
    }

    #[test]
    fn test_query_far_away_is_empty() {
        let venues = vec![venue_at_meters("a", 0.0, 0.0, 10)];
        let index = SpatialIndex::build(&venues, 1000.0);
        assert!(index.query(50_000.0, 50_000.0, 300.0).is_empty());
    }
}
