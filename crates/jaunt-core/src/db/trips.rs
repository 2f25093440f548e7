//! Trip repository

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{Trip, TripId};

/// A trip row as persisted: the entity plus sync bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTrip {
    pub trip: Trip,
    pub base_version: i64,
    pub is_deleted: bool,
}

/// Trait for trip storage operations
pub trait TripRepository {
    fn insert(&self, trip: &Trip) -> Result<()>;
    fn update(&self, trip: &Trip) -> Result<()>;
    fn get(&self, id: &TripId) -> Result<Option<Trip>>;
    fn get_stored(&self, id: &TripId) -> Result<Option<StoredTrip>>;
    /// Live trips overlapping `[start_ms, end_ms)` (an ongoing trip overlaps
    /// everything after its start), ordered by start.
    fn list_overlapping(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Trip>>;
    /// Auto-detected live trips starting in the window.
    fn list_auto_in_window(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Trip>>;
    fn mark_deleted(&self, id: &TripId, device_id: &str) -> Result<()>;
    /// Write a row exactly as given (entity, base version, tombstone flag).
    fn put(&self, stored: &StoredTrip) -> Result<()>;
    fn apply_remote(&self, stored: &StoredTrip) -> Result<()>;
    fn set_base_version(&self, id: &TripId, base_version: i64) -> Result<()>;
}

/// SQLite implementation of `TripRepository`
pub struct SqliteTripRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTripRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    const SELECT: &'static str = "SELECT id, start_ms, end_ms, display_name, is_ongoing,
            is_auto_detected, tags, summary, version, device_id, updated_at,
            base_version, is_deleted
         FROM trips";

    fn parse_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredTrip> {
        let id: String = row.get(0)?;
        let tags_json: String = row.get(6)?;
        Ok(StoredTrip {
            trip: Trip {
                id: id.parse().unwrap_or_default(),
                start_ms: row.get(1)?,
                end_ms: row.get(2)?,
                display_name: row.get(3)?,
                is_ongoing: row.get::<_, i32>(4)? != 0,
                is_auto_detected: row.get::<_, i32>(5)? != 0,
                tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                summary: row.get(7)?,
                version: row.get(8)?,
                device_id: row.get(9)?,
                updated_at: row.get(10)?,
            },
            base_version: row.get(11)?,
            is_deleted: row.get::<_, i32>(12)? != 0,
        })
    }

    fn write_row(&self, stored: &StoredTrip) -> Result<()> {
        let t = &stored.trip;
        self.conn.execute(
            "INSERT OR REPLACE INTO trips
                 (id, start_ms, end_ms, display_name, is_ongoing, is_auto_detected,
                  tags, summary, version, device_id, updated_at, base_version, is_deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                t.id.as_str(),
                t.start_ms,
                t.end_ms,
                t.display_name,
                i32::from(t.is_ongoing),
                i32::from(t.is_auto_detected),
                serde_json::to_string(&t.tags)?,
                t.summary,
                t.version,
                t.device_id,
                t.updated_at,
                stored.base_version,
                i32::from(stored.is_deleted),
            ],
        )?;
        Ok(())
    }
}

impl TripRepository for SqliteTripRepository<'_> {
    fn insert(&self, trip: &Trip) -> Result<()> {
        trip.validate()?;
        self.write_row(&StoredTrip {
            trip: trip.clone(),
            base_version: 0,
            is_deleted: false,
        })
    }

    fn update(&self, trip: &Trip) -> Result<()> {
        trip.validate()?;
        let existing = self
            .get_stored(&trip.id)?
            .ok_or_else(|| Error::not_found("trip", trip.id.to_string()))?;
        self.write_row(&StoredTrip {
            trip: trip.clone(),
            base_version: existing.base_version,
            is_deleted: existing.is_deleted,
        })
    }

    fn get(&self, id: &TripId) -> Result<Option<Trip>> {
        Ok(self
            .get_stored(id)?
            .filter(|s| !s.is_deleted)
            .map(|s| s.trip))
    }

    fn get_stored(&self, id: &TripId) -> Result<Option<StoredTrip>> {
        let stored = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?", Self::SELECT),
                params![id.as_str()],
                Self::parse_stored,
            )
            .optional()?;
        Ok(stored)
    }

    fn list_overlapping(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Trip>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE is_deleted = 0
                 AND start_ms < ?
                 AND (end_ms IS NULL OR end_ms >= ?)
             ORDER BY start_ms ASC",
            Self::SELECT
        ))?;

        let trips = stmt
            .query_map(params![end_ms, start_ms], Self::parse_stored)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|s| s.trip)
            .collect();

        Ok(trips)
    }

    fn list_auto_in_window(&self, start_ms: i64, end_ms: i64) -> Result<Vec<Trip>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE is_deleted = 0 AND is_auto_detected = 1
                 AND start_ms >= ? AND start_ms < ?
             ORDER BY start_ms ASC",
            Self::SELECT
        ))?;

        let trips = stmt
            .query_map(params![start_ms, end_ms], Self::parse_stored)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|s| s.trip)
            .collect();

        Ok(trips)
    }

    fn mark_deleted(&self, id: &TripId, device_id: &str) -> Result<()> {
        let mut stored = self
            .get_stored(id)?
            .ok_or_else(|| Error::not_found("trip", id.to_string()))?;
        stored.trip.touch(device_id);
        stored.is_deleted = true;
        self.write_row(&stored)
    }

    fn put(&self, stored: &StoredTrip) -> Result<()> {
        stored.trip.validate()?;
        self.write_row(stored)
    }

    fn apply_remote(&self, stored: &StoredTrip) -> Result<()> {
        self.put(&StoredTrip {
            trip: stored.trip.clone(),
            base_version: stored.trip.version,
            is_deleted: stored.is_deleted,
        })
    }

    fn set_base_version(&self, id: &TripId, base_version: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE trips SET base_version = ? WHERE id = ?",
            params![base_version, id.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn insert_and_roundtrip_tags() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTripRepository::new(db.conn());

        let mut trip = Trip::user_created(1_000, 2_000, "Coast drive", "device-a");
        trip.tags = vec!["beach".to_string(), "family".to_string()];
        repo.insert(&trip).unwrap();

        let fetched = repo.get(&trip.id).unwrap().unwrap();
        assert_eq!(fetched.tags, trip.tags);
    }

    #[test]
    fn ongoing_trip_overlaps_open_ended() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTripRepository::new(db.conn());

        let trip = Trip::auto_detected(1_000, "device-a");
        repo.insert(&trip).unwrap();

        // Window far after the start still sees the ongoing trip
        let listed = repo.list_overlapping(100_000, 200_000).unwrap();
        assert_eq!(listed.len(), 1);
        // Window entirely before the start does not
        let listed = repo.list_overlapping(0, 1_000).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn auto_window_excludes_user_trips() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTripRepository::new(db.conn());

        repo.insert(&Trip::auto_detected(1_000, "device-a")).unwrap();
        repo.insert(&Trip::user_created(1_500, 2_000, "Mine", "device-a"))
            .unwrap();

        let autos = repo.list_auto_in_window(0, 10_000).unwrap();
        assert_eq!(autos.len(), 1);
        assert!(autos[0].is_auto_detected);
    }

    #[test]
    fn update_preserves_base_version() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteTripRepository::new(db.conn());

        let mut trip = Trip::auto_detected(1_000, "device-a");
        repo.insert(&trip).unwrap();
        repo.set_base_version(&trip.id, 4).unwrap();

        trip.close(9_000);
        trip.touch("device-a");
        repo.update(&trip).unwrap();

        let stored = repo.get_stored(&trip.id).unwrap().unwrap();
        assert_eq!(stored.base_version, 4);
        assert_eq!(stored.trip.version, 2);
    }
}
