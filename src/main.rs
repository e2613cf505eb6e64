//! Heatmap server: live venue-busyness heat-map tiles.
//!
//! Single-binary Tokio application that:
//! 1. Reads active venue occupancy from SQLite (or a JSON snapshot)
//! 2. Renders KDE heat-map tiles on demand through a two-tier cache
//! 3. Precomputes the configured region on a fixed interval
//! 4. Periodically evicts and purges stale cache entries

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use common::config::HeatmapConfig;
use common::VenueSample;
use heatmap::KdeEngine;
use tile_cache::{MemoryCache, SqliteTileStore, TileStore};
use tile_service::{spawn_maintenance_loop, HeatmapService, PrecomputeScheduler, SweepOutcome};
use venue_store::{SqliteVenueStore, StaticVenueStore, VenueStore};

/// Live busyness heat-map tile server
#[derive(Parser)]
#[command(name = "heatmap-server", about = "Venue busyness heat-map tile server")]
struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Read venues from a JSON array instead of the SQLite `venues` table.
    #[arg(long, global = true)]
    venues: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the precompute scheduler and cache maintenance until Ctrl+C (default).
    Serve,
    /// Render a single tile to a PNG file.
    Render {
        #[arg(long)]
        zoom: u8,
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
        #[arg(long, default_value = "tile.png")]
        out: PathBuf,
    },
    /// Print the numeric intensity grid for a tile as JSON.
    Grid {
        #[arg(long)]
        zoom: u8,
        #[arg(long)]
        x: u32,
        #[arg(long)]
        y: u32,
    },
    /// Run one precompute sweep over the configured region and exit.
    Precompute,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Everything the subcommands share.
struct App {
    cfg: HeatmapConfig,
    venues: Arc<dyn VenueStore>,
    memory: Arc<MemoryCache>,
    store: Option<Arc<dyn TileStore>>,
    service: Arc<HeatmapService>,
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "heatmap_server=info,tile_service=info,tile_cache=info,heatmap=info,venue_store=info"
                    .into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Tiles: zoom {}..={}, {}px, gamma={}, blur σ={}",
        cfg.tiles.min_zoom,
        cfg.tiles.max_zoom,
        cfg.tiles.tile_size,
        cfg.tiles.gamma,
        cfg.tiles.gaussian_blur_sigma
    );
    info!(
        "Cache: memory ttl={}s, persistent ttl={}s, db={}",
        cfg.cache.cache_ttl_secs, cfg.cache.persistent_ttl_secs, cfg.database_path
    );

    let app = match build_app(cfg, cli.venues.as_deref()) {
        Ok(app) => app,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve(app).await;
            Ok(())
        }
        Command::Render { zoom, x, y, out } => render(&app, zoom, x, y, &out).await,
        Command::Grid { zoom, x, y } => grid(&app, zoom, x, y).await,
        Command::Precompute => precompute(&app).await,
    };

    if let Err(e) = result {
        if e.is_client_error() {
            error!("Invalid request: {}", e);
            std::process::exit(2);
        }
        error!("{}", e);
        std::process::exit(1);
    }
}

fn build_app(cfg: HeatmapConfig, venues_file: Option<&Path>) -> common::Result<App> {
    let venues: Arc<dyn VenueStore> = match venues_file {
        Some(path) => Arc::new(StaticVenueStore::from_json_file(path)?),
        None => Arc::new(SqliteVenueStore::open(&cfg.database_path)?),
    };

    // Tiles can always be re-rendered, so a broken persistent tier is not fatal.
    let store: Option<Arc<dyn TileStore>> = match SqliteTileStore::open(&cfg.database_path) {
        Ok(s) => Some(Arc::new(s)),
        Err(e) => {
            warn!("Persistent tile cache disabled: {}", e);
            None
        }
    };

    let engine = Arc::new(KdeEngine::new(cfg.kde.clone(), cfg.tiles.clone()));
    let memory = Arc::new(MemoryCache::new(&cfg.cache));
    let service = Arc::new(HeatmapService::new(
        engine,
        memory.clone(),
        store.clone(),
        &cfg.cache,
    ));

    Ok(App {
        cfg,
        venues,
        memory,
        store,
        service,
    })
}

async fn active_venues(app: &App) -> common::Result<Vec<VenueSample>> {
    let venues = app.venues.list_active_venues().await?;
    info!("{} active venues", venues.len());
    Ok(venues)
}

// ── Subcommands ─────────────────────────────────────────────────────

async fn render(app: &App, zoom: u8, x: u32, y: u32, out: &Path) -> common::Result<()> {
    app.service.renderer().validate_tile(zoom, x, y)?;
    let venues = active_venues(app).await?;
    let png = app.service.get_tile(zoom, x, y, &venues).await?;
    std::fs::write(out, &png)?;
    info!(
        "Wrote tile {}/{}/{} ({} bytes) to {}",
        zoom,
        x,
        y,
        png.len(),
        out.display()
    );
    Ok(())
}

async fn grid(app: &App, zoom: u8, x: u32, y: u32) -> common::Result<()> {
    app.service.renderer().validate_tile(zoom, x, y)?;
    let venues = active_venues(app).await?;
    let grid = app.service.get_grid(zoom, x, y, &venues)?;
    println!("{}", serde_json::to_string_pretty(&grid)?);
    Ok(())
}

async fn precompute(app: &App) -> common::Result<()> {
    let scheduler = PrecomputeScheduler::new(app.service.clone(), app.venues.clone(), &app.cfg);
    match scheduler.trigger().await? {
        SweepOutcome::Completed(report) => info!(
            "Precomputed {} tiles across {} zooms ({} failed) in {:.2}s",
            report.tiles,
            report.zooms,
            report.failed,
            report.duration.as_secs_f64()
        ),
        SweepOutcome::AlreadyRunning => warn!("Precompute already running"),
    }
    Ok(())
}

async fn serve(app: App) {
    // Task 1: Precompute scheduler
    let scheduler = Arc::new(PrecomputeScheduler::new(
        app.service.clone(),
        app.venues.clone(),
        &app.cfg,
    ));
    let scheduler_handle = if app.cfg.scheduler.enabled {
        Some(scheduler.start())
    } else {
        info!("Precompute scheduler disabled");
        None
    };

    // Task 2: Cache maintenance
    let mut maintenance_handle = spawn_maintenance_loop(
        app.memory.clone(),
        app.store.clone(),
        Duration::from_secs(app.cfg.cache.maintenance_interval_secs),
    );

    // Task 3: Heartbeat
    let hb_service = app.service.clone();
    let hb_scheduler = scheduler.clone();
    let mut heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let stats = hb_service.stats();
            let last = hb_scheduler
                .last_precompute_time()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into());
            info!(
                "HEARTBEAT: tiles={} grids={} hits={} misses={} hit_rate={:.1}% evictions={} state={:?} last_precompute={}",
                stats.tiles,
                stats.grids,
                stats.hits,
                stats.misses,
                stats.hit_rate() * 100.0,
                stats.evictions,
                hb_scheduler.state(),
                last
            );
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("Heatmap server is running. Press Ctrl+C to stop.");

    let scheduler_exit = async {
        match scheduler_handle {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        r = scheduler_exit => {
            error!("Scheduler task exited: {:?}", r);
        }
        r = &mut maintenance_handle => {
            error!("Maintenance task exited: {:?}", r);
        }
        r = &mut heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
        }
    }

    scheduler.stop();
    maintenance_handle.abort();
    heartbeat_handle.abort();
    info!("Heatmap server shut down.");
}
