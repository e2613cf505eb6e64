//! Persistent tile tier contract.
//!
//! A stored tile is valid only while it has not expired *and* its venue hash
//! matches the current one. The hash is the authoritative staleness signal;
//! expiry is a backstop.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{Error, Result, TileKey};
use dashmap::DashMap;

/// A persisted tile blob with its validation metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTile {
    pub key: TileKey,
    pub data: Bytes,
    pub venue_hash: String,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_hit_at: Option<DateTime<Utc>>,
}

impl StoredTile {
    pub fn is_valid(&self, current_hash: &str, now: DateTime<Utc>) -> bool {
        self.expires_at > now && self.venue_hash == current_hash
    }
}

/// Storage for rendered tiles that survives process restarts.
#[async_trait]
pub trait TileStore: Send + Sync {
    async fn get(&self, key: TileKey) -> Result<Option<StoredTile>>;

    /// Insert or replace the blob for `key`.
    async fn upsert(
        &self,
        key: TileKey,
        data: Bytes,
        venue_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Bump the hit counter and last-hit timestamp of a stored tile.
    async fn record_hit(&self, key: TileKey) -> Result<()>;

    /// Delete tiles that expired before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

// ── In-memory implementation ──────────────────────────────────────────

/// Process-local `TileStore`, used in tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: DashMap<TileKey, StoredTile>,
    unavailable: AtomicBool,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, simulating an unreachable store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Store("tile store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TileStore for MemoryTileStore {
    async fn get(&self, key: TileKey) -> Result<Option<StoredTile>> {
        self.check_available()?;
        Ok(self.tiles.get(&key).map(|t| t.clone()))
    }

    async fn upsert(
        &self,
        key: TileKey,
        data: Bytes,
        venue_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_available()?;
        let mut entry = self.tiles.entry(key).or_insert_with(|| StoredTile {
            key,
            data: Bytes::new(),
            venue_hash: String::new(),
            expires_at,
            hit_count: 0,
            last_hit_at: None,
        });
        entry.data = data;
        entry.venue_hash = venue_hash.to_string();
        entry.expires_at = expires_at;
        Ok(())
    }

    async fn record_hit(&self, key: TileKey) -> Result<()> {
        self.check_available()?;
        if let Some(mut tile) = self.tiles.get_mut(&key) {
            tile.hit_count += 1;
            tile.last_hit_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.check_available()?;
        let before = self.tiles.len();
        self.tiles.retain(|_, t| t.expires_at > now);
        Ok(before.saturating_sub(self.tiles.len()))
    }
}
