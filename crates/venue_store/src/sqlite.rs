//! Venue occupancy read from the app's SQLite `venues` table.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{Error, Result, VenueSample};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::{retain_active, VenueStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS venues (
    id                TEXT    PRIMARY KEY,
    name              TEXT    NOT NULL DEFAULT '',
    lat               REAL    NOT NULL,
    lng               REAL    NOT NULL,
    capacity          INTEGER NOT NULL DEFAULT 0,
    current_occupancy INTEGER NOT NULL DEFAULT 0,
    rating            REAL
);
";

#[derive(Clone)]
pub struct SqliteVenueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVenueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_connection(Connection::open(path).map_err(store_err)?)
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

    /// Insert or update a venue's position, capacity and occupancy.
    pub async fn upsert_venue(&self, venue: VenueSample) -> Result<()> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO venues (id, lat, lng, capacity, current_occupancy, rating)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (id) DO UPDATE SET
                     lat = excluded.lat,
                     lng = excluded.lng,
                     capacity = excluded.capacity,
                     current_occupancy = excluded.current_occupancy,
                     rating = excluded.rating",
                params![
                    venue.id,
                    venue.lat,
                    venue.lng,
                    venue.capacity,
                    venue.occupancy,
                    venue.rating
                ],
            )
            .map(|_| ())
        })
        .await
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
        .map_err(|e| Error::Store(format!("venue store task failed: {}", e)))?
        .map_err(store_err)
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

#[async_trait]
impl VenueStore for SqliteVenueStore {
    async fn list_active_venues(&self) -> Result<Vec<VenueSample>> {
        let venues = self
            .run(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, lng, lat, capacity, current_occupancy, rating
                     FROM venues
                     WHERE capacity > 0 AND current_occupancy > 0",
                )?;
                let rows = stmt.query_map([], |row| {
                    let capacity: i64 = row.get(3)?;
                    let occupancy: i64 = row.get(4)?;
                    Ok(VenueSample {
                        id: row.get(0)?,
                        lng: row.get(1)?,
                        lat: row.get(2)?,
                        capacity: capacity.clamp(0, u32::MAX as i64) as u32,
                        occupancy: occupancy.clamp(0, u32::MAX as i64) as u32,
                        rating: row.get(5)?,
                    })
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        debug!("Read {} active venues", venues.len());
        Ok(retain_active(venues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue(id: &str, capacity: u32, occupancy: u32) -> VenueSample {
        VenueSample {
            id: id.into(),
            lng: 153.03,
            lat: -27.46,
            capacity,
            occupancy,
            rating: None,
        }
    }

    #[tokio::test]
    async fn test_only_active_venues_listed() {
        let store = SqliteVenueStore::open_in_memory().unwrap();
        store.upsert_venue(venue("open", 300, 120)).await.unwrap();
        store.upsert_venue(venue("empty", 300, 0)).await.unwrap();
        store.upsert_venue(venue("unknown", 0, 40)).await.unwrap();

        let active = store.list_active_venues().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "open");
        assert_eq!(active[0].occupancy, 120);
    }

    #[tokio::test]
    async fn test_upsert_updates_occupancy() {
        let store = SqliteVenueStore::open_in_memory().unwrap();
        store.upsert_venue(venue("a", 100, 10)).await.unwrap();
        store.upsert_venue(venue("a", 100, 95)).await.unwrap();
        let active = store.list_active_venues().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].occupancy, 95);
    }
}
