//! SQLite-backed persistent tile store.
//!
//! `rusqlite` is blocking, so every call hops onto Tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{Error, Result, TileKey};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::persistent::{StoredTile, TileStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS heatmap_tiles (
    zoom          INTEGER NOT NULL,
    x             INTEGER NOT NULL,
    y             INTEGER NOT NULL,
    data          BLOB    NOT NULL,
    venue_hash    TEXT    NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    hit_count     INTEGER NOT NULL DEFAULT 0,
    last_hit_ms   INTEGER,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (zoom, x, y)
);
CREATE INDEX IF NOT EXISTS idx_heatmap_tiles_expires ON heatmap_tiles (expires_at_ms);
";

/// Tile blobs keyed by `(zoom, x, y)` in a SQLite table.
#[derive(Clone)]
pub struct SqliteTileStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(store_err)?;
        info!("Opened tile store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(store_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| Error::Store(format!("tile store task failed: {}", e)))?
        .map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

#[async_trait]
impl TileStore for SqliteTileStore {
    async fn get(&self, key: TileKey) -> Result<Option<StoredTile>> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT data, venue_hash, expires_at_ms, hit_count, last_hit_ms
                 FROM heatmap_tiles WHERE zoom = ?1 AND x = ?2 AND y = ?3",
                params![key.zoom, key.x, key.y],
                |row| {
                    let data: Vec<u8> = row.get(0)?;
                    let hit_count: i64 = row.get(3)?;
                    let last_hit_ms: Option<i64> = row.get(4)?;
                    Ok(StoredTile {
                        key,
                        data: Bytes::from(data),
                        venue_hash: row.get(1)?,
                        expires_at: from_millis(row.get(2)?),
                        hit_count: hit_count.max(0) as u64,
                        last_hit_at: last_hit_ms.map(from_millis),
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn upsert(
        &self,
        key: TileKey,
        data: Bytes,
        venue_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let venue_hash = venue_hash.to_string();
        let now_ms = Utc::now().timestamp_millis();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO heatmap_tiles (zoom, x, y, data, venue_hash, expires_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (zoom, x, y) DO UPDATE SET
                     data = excluded.data,
                     venue_hash = excluded.venue_hash,
                     expires_at_ms = excluded.expires_at_ms,
                     updated_at_ms = excluded.updated_at_ms",
                params![
                    key.zoom,
                    key.x,
                    key.y,
                    data.as_ref(),
                    venue_hash,
                    expires_at.timestamp_millis(),
                    now_ms
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn record_hit(&self, key: TileKey) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        self.run(move |conn| {
            conn.execute(
                "UPDATE heatmap_tiles SET hit_count = hit_count + 1, last_hit_ms = ?4
                 WHERE zoom = ?1 AND x = ?2 AND y = ?3",
                params![key.zoom, key.x, key.y, now_ms],
            )
            .map(|_| ())
        })
        .await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let now_ms = now.timestamp_millis();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM heatmap_tiles WHERE expires_at_ms <= ?1",
                params![now_ms],
            )
        })
        .await
    }
}
