//! Unified error type for the heat-map tile server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Zoom {zoom} out of range (supported {min}..={max})")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },

    #[error("Tile {zoom}/{x}/{y} does not exist (indices must be below 2^{zoom})")]
    TileOutOfRange { zoom: u8, x: u32, y: u32 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Raster encode error: {0}")]
    Encode(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors caused by the request itself rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::ZoomOutOfRange { .. } | Error::TileOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_error_is_client_error() {
        let err = Error::ZoomOutOfRange {
            zoom: 3,
            min: 11,
            max: 20,
        };
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Zoom 3 out of range (supported 11..=20)");
        assert!(!Error::Store("db locked".into()).is_client_error());
    }

    #[test]
    fn test_tile_index_error_is_client_error() {
        let err = Error::TileOutOfRange {
            zoom: 2,
            x: 4,
            y: 0,
        };
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Tile 2/4/0 does not exist (indices must be below 2^2)"
        );
    }
}
