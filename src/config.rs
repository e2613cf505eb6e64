//! Configuration loader: merges `.env`, an optional TOML file and `HEATMAP_*`
//! environment variables, then validates the result.

use std::path::Path;

use common::config::HeatmapConfig;
use common::{Error, GeoBounds};
use heatmap::projection::MAX_LATITUDE;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn parse_positive<T>(raw: &str, env_name: &str) -> Result<T, Error>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed = raw
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{env_name} must be a number > 0")))?;
    if parsed <= T::default() {
        return Err(Error::Config(format!("{env_name} must be a number > 0")));
    }
    Ok(parsed)
}

fn parse_zoom(raw: &str, env_name: &str) -> Result<u8, Error> {
    raw.trim()
        .parse::<u8>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer in 0..=30")))
}

fn validate_config(config: &HeatmapConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();
    let tiles = &config.tiles;

    if tiles.min_zoom > tiles.max_zoom {
        issues.push("tiles.min_zoom must be <= tiles.max_zoom".into());
    }
    if tiles.max_zoom > 30 {
        issues.push("tiles.max_zoom must be <= 30".into());
    }
    if tiles.tile_size == 0 {
        issues.push("tiles.tile_size must be > 0".into());
    }
    if tiles.gamma <= 0.0 {
        issues.push("tiles.gamma must be > 0".into());
    }
    if tiles.gaussian_blur_sigma < 0.0 {
        issues.push("tiles.gaussian_blur_sigma must be >= 0".into());
    }
    if tiles.sample_step == 0 {
        issues.push("tiles.sample_step must be > 0".into());
    }
    if tiles.grid_size == 0 {
        issues.push("tiles.grid_size must be > 0".into());
    }
    if tiles.max_venues_per_tile == 0 {
        issues.push("tiles.max_venues_per_tile must be > 0".into());
    }

    if config.kde.base_bandwidth_m <= 0.0 {
        issues.push("kde.base_bandwidth_m must be > 0".into());
    }
    if config.kde.cell_size_m <= 0.0 {
        issues.push("kde.cell_size_m must be > 0".into());
    }
    if config.kde.normalization_floor <= 0.0 {
        issues.push("kde.normalization_floor must be > 0".into());
    }

    if config.cache.cache_ttl_secs == 0 {
        issues.push("cache.cache_ttl_secs must be > 0".into());
    }
    if config.cache.persistent_ttl_secs == 0 {
        issues.push("cache.persistent_ttl_secs must be > 0".into());
    }
    if config.cache.maintenance_interval_secs == 0 {
        issues.push("cache.maintenance_interval_secs must be > 0".into());
    }
    if !(config.cache.eviction_fraction > 0.0 && config.cache.eviction_fraction <= 1.0) {
        issues.push("cache.eviction_fraction must be in (0,1]".into());
    }

    if config.scheduler.tile_update_interval_secs == 0 {
        issues.push("scheduler.tile_update_interval_secs must be > 0".into());
    }
    for zoom in &config.scheduler.zoom_levels {
        if *zoom < tiles.min_zoom || *zoom > tiles.max_zoom {
            issues.push(format!(
                "scheduler.zoom_levels contains {} outside {}..={}",
                zoom, tiles.min_zoom, tiles.max_zoom
            ));
        }
    }
    let b = &config.scheduler.bounds;
    if b.min_lng >= b.max_lng || b.min_lat >= b.max_lat {
        issues.push("scheduler.bounds must have min < max on both axes".into());
    }
    if b.min_lat < -MAX_LATITUDE || b.max_lat > MAX_LATITUDE {
        issues.push(format!(
            "scheduler.bounds latitude must be within ±{:.4}",
            MAX_LATITUDE
        ));
    }
    if b.min_lng < -180.0 || b.max_lng > 180.0 {
        issues.push("scheduler.bounds longitude must be within ±180".into());
    }

    if config.database_path.trim().is_empty() {
        issues.push("database_path must not be empty".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load server configuration.
///
/// `path` overrides the default `config.toml`; an explicit path that does not
/// exist is an error, a missing default file is not.
pub fn load_config(path: Option<&Path>) -> Result<HeatmapConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults, then layer the TOML file on top.
    let mut config = HeatmapConfig::default();
    let config_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    } else if path.is_some() {
        return Err(Error::Config(format!(
            "Config file {} not found",
            config_path.display()
        )));
    }

    // 3. Override with environment variables (highest priority).
    apply_env_overrides(&mut config)?;

    validate_config(&config)?;
    Ok(config)
}

fn apply_env_overrides(config: &mut HeatmapConfig) -> Result<(), Error> {
    if let Ok(raw) = std::env::var("HEATMAP_MIN_ZOOM") {
        config.tiles.min_zoom = parse_zoom(&raw, "HEATMAP_MIN_ZOOM")?;
    }
    if let Ok(raw) = std::env::var("HEATMAP_MAX_ZOOM") {
        config.tiles.max_zoom = parse_zoom(&raw, "HEATMAP_MAX_ZOOM")?;
    }
    if let Ok(raw) = std::env::var("HEATMAP_TILE_SIZE") {
        config.tiles.tile_size = parse_positive(&raw, "HEATMAP_TILE_SIZE")?;
    }
    if let Ok(raw) = std::env::var("HEATMAP_GAMMA") {
        config.tiles.gamma = parse_positive(&raw, "HEATMAP_GAMMA")?;
    }
    if let Ok(raw) = std::env::var("HEATMAP_BLUR_SIGMA") {
        let sigma = raw
            .trim()
            .parse::<f32>()
            .map_err(|_| Error::Config("HEATMAP_BLUR_SIGMA must be a number >= 0".into()))?;
        config.tiles.gaussian_blur_sigma = sigma;
    }
    if let Ok(raw) = std::env::var("HEATMAP_MAX_VENUES_PER_TILE") {
        config.tiles.max_venues_per_tile = parse_positive(&raw, "HEATMAP_MAX_VENUES_PER_TILE")?;
    }
    if let Ok(raw) = std::env::var("HEATMAP_CACHE_TTL_SECS") {
        config.cache.cache_ttl_secs = parse_positive(&raw, "HEATMAP_CACHE_TTL_SECS")?;
    }
    if let Ok(raw) = std::env::var("HEATMAP_TILE_UPDATE_INTERVAL_SECS") {
        config.scheduler.tile_update_interval_secs =
            parse_positive(&raw, "HEATMAP_TILE_UPDATE_INTERVAL_SECS")?;
    }
    if let Ok(raw) = std::env::var("HEATMAP_BOUNDS") {
        config.scheduler.bounds = raw
            .parse::<GeoBounds>()
            .map_err(|e| Error::Config(format!("HEATMAP_BOUNDS: {}", e)))?;
    }
    if let Ok(path) = std::env::var("HEATMAP_DATABASE_PATH") {
        config.database_path = path;
    }
    Ok(())
}
