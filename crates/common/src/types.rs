//! Core domain types shared across the heat-map crates.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Venues ────────────────────────────────────────────────────────────

/// A point-in-time occupancy sample for one venue.
///
/// Fetched fresh from the venue store on every computation cycle and never
/// persisted by the heat-map core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueSample {
    pub id: String,
    pub lng: f64,
    pub lat: f64,
    pub capacity: u32,
    pub occupancy: u32,
    #[serde(default)]
    pub rating: Option<f64>,
}

impl VenueSample {
    /// Occupancy as a fraction of capacity, clamped to `[0, 1]`.
    ///
    /// Occupancy above capacity only happens with inconsistent data.
    pub fn occupancy_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return if self.occupancy > 0 { 1.0 } else { 0.0 };
        }
        (self.occupancy as f64 / self.capacity as f64).min(1.0)
    }

    /// Whether this venue contributes anything to the heat map.
    pub fn is_active(&self) -> bool {
        self.capacity > 0 && self.occupancy > 0
    }

    pub fn status(&self) -> VenueStatus {
        VenueStatus::from_ratio(self.occupancy_ratio())
    }
}

/// Four-level busyness vocabulary shared with the app's venue cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueStatus {
    Quiet,
    Moderate,
    Busy,
    VeryBusy,
}

impl VenueStatus {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.3 {
            VenueStatus::Quiet
        } else if ratio < 0.6 {
            VenueStatus::Moderate
        } else if ratio < 0.9 {
            VenueStatus::Busy
        } else {
            VenueStatus::VeryBusy
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VenueStatus::Quiet => "QUIET",
            VenueStatus::Moderate => "MODERATE",
            VenueStatus::Busy => "BUSY",
            VenueStatus::VeryBusy => "VERY_BUSY",
        }
    }
}

// ── Geography ─────────────────────────────────────────────────────────

/// A longitude/latitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

/// A lng/lat bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl GeoBounds {
    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lng >= self.min_lng
            && point.lng <= self.max_lng
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }
}

impl std::str::FromStr for GeoBounds {
    type Err = String;

    /// Parses `minLng,minLat,maxLng,maxLat`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid bounds '{}': {}", s, e))?;
        if parts.len() != 4 {
            return Err(format!(
                "bounds must have 4 comma-separated values, got {}",
                parts.len()
            ));
        }
        Ok(GeoBounds {
            min_lng: parts[0],
            min_lat: parts[1],
            max_lng: parts[2],
            max_lat: parts[3],
        })
    }
}

// ── Tiles ─────────────────────────────────────────────────────────────

/// Slippy-map tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// One sample of the coarse numeric grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub lat: f64,
    pub lng: f64,
    pub intensity: f64,
}

/// Coarse non-image heat-map payload for lightweight clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub cells: Vec<GridCell>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(capacity: u32, occupancy: u32) -> VenueSample {
        VenueSample {
            id: "v1".into(),
            lng: 153.0,
            lat: -27.47,
            capacity,
            occupancy,
            rating: None,
        }
    }

    #[test]
    fn test_occupancy_ratio_clamps_overfull() {
        assert_eq!(venue(100, 150).occupancy_ratio(), 1.0);
        assert!((venue(200, 50).occupancy_ratio() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(venue(100, 29).status(), VenueStatus::Quiet);
        assert_eq!(venue(100, 30).status(), VenueStatus::Moderate);
        assert_eq!(venue(100, 60).status(), VenueStatus::Busy);
        assert_eq!(venue(100, 90).status(), VenueStatus::VeryBusy);
        assert_eq!(VenueStatus::VeryBusy.label(), "VERY_BUSY");
    }

    #[test]
    fn test_inactive_venues() {
        assert!(!venue(100, 0).is_active());
        assert!(!venue(0, 10).is_active());
        assert!(venue(100, 1).is_active());
    }

    #[test]
    fn test_bounds_parse() {
        let b: GeoBounds = "152.9,-27.6,153.2,-27.3".parse().unwrap();
        assert_eq!(b.min_lng, 152.9);
        assert_eq!(b.max_lat, -27.3);
        assert!(b.contains(GeoPoint { lng: 153.0, lat: -27.47 }));
        assert!("1,2,3".parse::<GeoBounds>().is_err());
    }

    #[test]
    fn test_tile_key_display() {
        assert_eq!(TileKey::new(14, 15142, 9513).to_string(), "14/15142/9513");
    }

    #[test]
    fn test_grid_serializes_expected_shape() {
        let grid = TileGrid {
            zoom: 14,
            x: 1,
            y: 2,
            cells: vec![GridCell {
                lat: -27.4,
                lng: 153.0,
                intensity: 0.5,
            }],
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&grid).unwrap();
        assert_eq!(json["zoom"], 14);
        assert_eq!(json["cells"][0]["intensity"], 0.5);
        assert!(json["timestamp"].is_string());
    }
}
