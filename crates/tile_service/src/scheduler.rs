//! Periodic precompute of the tile pyramid over a fixed region.
//!
//! At most one sweep runs at a time. A trigger that arrives mid-sweep is
//! dropped, not queued. Stopping the loop never interrupts a sweep that has
//! already started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::config::HeatmapConfig;
use common::{GeoBounds, GeoPoint, Result, VenueSample, VenueStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use venue_store::VenueStore;

use crate::service::HeatmapService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Precomputing,
}

/// Totals for one full sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub venues: usize,
    /// Venues inside the precompute bounds.
    pub in_bounds: usize,
    pub zooms: usize,
    pub tiles: usize,
    pub failed: usize,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    AlreadyRunning,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PrecomputeScheduler {
    service: Arc<HeatmapService>,
    venues: Arc<dyn VenueStore>,
    bounds: GeoBounds,
    zoom_levels: Vec<u8>,
    interval: Duration,
    running: AtomicBool,
    last_precompute: Mutex<Option<DateTime<Utc>>>,
    stop_tx: watch::Sender<bool>,
}

impl PrecomputeScheduler {
    pub fn new(
        service: Arc<HeatmapService>,
        venues: Arc<dyn VenueStore>,
        config: &HeatmapConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            service,
            venues,
            bounds: config.scheduler.bounds,
            zoom_levels: config.precompute_zooms(),
            interval: Duration::from_secs(config.scheduler.tile_update_interval_secs),
            running: AtomicBool::new(false),
            last_precompute: Mutex::new(None),
            stop_tx,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::SeqCst) {
            SchedulerState::Precomputing
        } else {
            SchedulerState::Idle
        }
    }

    /// Completion time of the last successful sweep.
    pub fn last_precompute_time(&self) -> Option<DateTime<Utc>> {
        *self
            .last_precompute
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Run one sweep now, unless one is already in flight.
    pub async fn trigger(&self) -> Result<SweepOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Precompute already running, skipping trigger");
            return Ok(SweepOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let report = self.sweep().await?;
        *self
            .last_precompute
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        Ok(SweepOutcome::Completed(report))
    }

    async fn sweep(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let venues = self.venues.list_active_venues().await?;
        let in_bounds = venues
            .iter()
            .filter(|v| self.bounds.contains(GeoPoint { lng: v.lng, lat: v.lat }))
            .count();
        info!(
            "Precompute starting: {} active venues ({} in bounds; {}), zooms {:?}",
            venues.len(),
            in_bounds,
            status_breakdown(&venues),
            self.zoom_levels
        );

        let region = self
            .service
            .refresh_pyramid(&venues, &self.bounds, &self.zoom_levels)
            .await;

        let report = SweepReport {
            venues: venues.len(),
            in_bounds,
            zooms: self.zoom_levels.len(),
            tiles: region.rendered,
            failed: region.failed,
            duration: started.elapsed(),
        };
        info!(
            "Precompute finished: {} tiles ({} failed) in {:.2}s",
            report.tiles,
            report.failed,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    /// Spawn the periodic loop. The first sweep runs immediately.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                "Precompute scheduler started (every {}s)",
                scheduler.interval.as_secs()
            );

            while !*stop_rx.borrow() {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.trigger().await {
                            error!("Precompute sweep failed: {}", e);
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Precompute scheduler stopped");
        })
    }

    /// Cancel future sweeps. A sweep in progress runs to completion.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

/// Venue counts per busyness level, e.g. `QUIET=3 MODERATE=1 BUSY=0 VERY_BUSY=2`.
fn status_breakdown(venues: &[VenueSample]) -> String {
    [
        VenueStatus::Quiet,
        VenueStatus::Moderate,
        VenueStatus::Busy,
        VenueStatus::VeryBusy,
    ]
    .iter()
    .map(|status| {
        let n = venues.iter().filter(|v| v.status() == *status).count();
        format!("{}={}", status.label(), n)
    })
    .collect::<Vec<_>>()
    .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::config::{KdeConfig, TileConfig};
    use heatmap::{tile_range, KdeEngine};
    use std::sync::atomic::AtomicUsize;
    use tile_cache::{MemoryCache, MemoryTileStore, TileStore};
    use tokio::sync::Notify;

    /// Counts reads and optionally blocks until released.
    #[derive(Default)]
    struct GatedVenues {
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl VenueStore for GatedVenues {
        async fn list_active_venues(&self) -> Result<Vec<VenueSample>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(vec![VenueSample {
                id: "v".into(),
                lng: 153.01,
                lat: -27.47,
                capacity: 100,
                occupancy: 80,
                rating: None,
            }])
        }
    }

    fn config() -> HeatmapConfig {
        let mut cfg = HeatmapConfig::default();
        cfg.tiles = TileConfig {
            tile_size: 16,
            ..TileConfig::default()
        };
        cfg.scheduler.zoom_levels = vec![12, 13];
        cfg.scheduler.bounds = GeoBounds {
            min_lng: 153.0,
            min_lat: -27.48,
            max_lng: 153.02,
            max_lat: -27.46,
        };
        cfg.scheduler.tile_update_interval_secs = 3600;
        cfg
    }

    fn scheduler(
        venues: Arc<GatedVenues>,
        store: Arc<MemoryTileStore>,
    ) -> Arc<PrecomputeScheduler> {
        let cfg = config();
        let engine = Arc::new(KdeEngine::new(KdeConfig::default(), cfg.tiles.clone()));
        let memory = Arc::new(MemoryCache::new(&cfg.cache));
        let store: Arc<dyn TileStore> = store;
        let service = Arc::new(HeatmapService::new(engine, memory, Some(store), &cfg.cache));
        Arc::new(PrecomputeScheduler::new(service, venues, &cfg))
    }

    #[tokio::test]
    async fn test_sweep_renders_every_zoom() {
        let store = Arc::new(MemoryTileStore::new());
        let sched = scheduler(Arc::new(GatedVenues::default()), store.clone());
        assert!(sched.last_precompute_time().is_none());

        let outcome = sched.trigger().await.unwrap();
        let bounds = config().scheduler.bounds;
        let expected = tile_range(&bounds, 12).len() + tile_range(&bounds, 13).len();
        match outcome {
            SweepOutcome::Completed(report) => {
                assert_eq!(report.tiles, expected);
                assert_eq!(report.failed, 0);
                assert_eq!(report.venues, 1);
                assert_eq!(report.in_bounds, 1);
                assert_eq!(report.zooms, 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(store.len(), expected);
        assert!(sched.last_precompute_time().is_some());
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_status_breakdown_counts_each_level() {
        let at = |occupancy: u32| VenueSample {
            id: format!("v{}", occupancy),
            lng: 153.01,
            lat: -27.47,
            capacity: 100,
            occupancy,
            rating: None,
        };
        let venues = vec![at(10), at(20), at(45), at(95)];
        assert_eq!(
            status_breakdown(&venues),
            "QUIET=2 MODERATE=1 BUSY=0 VERY_BUSY=1"
        );
        assert_eq!(status_breakdown(&[]), "QUIET=0 MODERATE=0 BUSY=0 VERY_BUSY=0");
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_dropped() {
        let gate = Arc::new(Notify::new());
        let venues = Arc::new(GatedVenues {
            calls: AtomicUsize::new(0),
            gate: Some(gate.clone()),
        });
        let sched = scheduler(venues.clone(), Arc::new(MemoryTileStore::new()));

        let first = {
            let sched = sched.clone();
            tokio::spawn(async move { sched.trigger().await })
        };
        while venues.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(sched.state(), SchedulerState::Precomputing);

        let second = sched.trigger().await.unwrap();
        assert_eq!(second, SweepOutcome::AlreadyRunning);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, SweepOutcome::Completed(_)));
        assert_eq!(venues.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sched.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_start_runs_immediately_and_stops() {
        let venues = Arc::new(GatedVenues::default());
        let sched = scheduler(venues.clone(), Arc::new(MemoryTileStore::new()));

        let handle = sched.start();
        while sched.last_precompute_time().is_none() {
            tokio::task::yield_now().await;
        }
        sched.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits after stop")
            .unwrap();
        assert_eq!(venues.calls.load(Ordering::SeqCst), 1);
    }
}
