//! Tile serving, background precompute and cache maintenance.
//!
//! `HeatmapService` is the read path (memory tier, then persistent tier, then
//! render). `PrecomputeScheduler` periodically re-renders the configured
//! region so the read path mostly hits warm caches.

pub mod maintenance;
pub mod scheduler;
pub mod service;

pub use maintenance::{run_maintenance, spawn_maintenance_loop, MaintenanceSummary};
pub use scheduler::{PrecomputeScheduler, SchedulerState, SweepOutcome, SweepReport};
pub use service::{HeatmapService, RegionReport};
