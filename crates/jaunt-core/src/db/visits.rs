//! Place visit repository

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{PlaceVisit, TripId, VisitCategory, VisitId};

/// A visit row as persisted: the entity plus sync bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVisit {
    pub visit: PlaceVisit,
    /// Version last acknowledged by the remote (CAS expectation on push).
    pub base_version: i64,
    pub is_deleted: bool,
}

/// Trait for visit storage operations
pub trait VisitRepository {
    /// Insert a freshly detected visit. Validates invariants first.
    fn insert(&self, visit: &PlaceVisit) -> Result<()>;

    /// Rewrite a visit row. Validates invariants first.
    fn update(&self, visit: &PlaceVisit) -> Result<()>;

    /// Get a live (non-deleted) visit.
    fn get(&self, id: &VisitId) -> Result<Option<PlaceVisit>>;

    /// Get any visit row including tombstones, with sync bookkeeping.
    fn get_stored(&self, id: &VisitId) -> Result<Option<StoredVisit>>;

    /// Live visits whose arrival falls in `[start_ms, end_ms)`, ordered by arrival.
    fn list_in_window(&self, start_ms: i64, end_ms: i64) -> Result<Vec<PlaceVisit>>;

    /// The open visit (no departure yet), if one exists.
    fn ongoing(&self) -> Result<Option<PlaceVisit>>;

    /// The most recent visit that departed at or before `ms` (the left edge
    /// of a route gap ending at `ms`).
    fn latest_departed_before(&self, ms: i64) -> Result<Option<PlaceVisit>>;

    /// Point a set of visits at a trip (or clear with `None`).
    fn assign_trip(&self, ids: &[VisitId], trip_id: Option<TripId>) -> Result<()>;

    /// Tombstone a visit.
    fn mark_deleted(&self, id: &VisitId, device_id: &str) -> Result<()>;

    /// Write a row exactly as given (entity, base version, tombstone flag).
    fn put(&self, stored: &StoredVisit) -> Result<()>;

    /// Overwrite with a remote snapshot; the remote version becomes the new base.
    fn apply_remote(&self, stored: &StoredVisit) -> Result<()>;

    /// Record that the remote accepted this version.
    fn set_base_version(&self, id: &VisitId, base_version: i64) -> Result<()>;
}

/// SQLite implementation of `VisitRepository`
pub struct SqliteVisitRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteVisitRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredVisit> {
        let id: String = row.get(0)?;
        let category: String = row.get(6)?;
        let trip_id: Option<String> = row.get(11)?;
        Ok(StoredVisit {
            visit: PlaceVisit {
                id: id.parse().unwrap_or_default(),
                center_lat: row.get(1)?,
                center_lon: row.get(2)?,
                radius_m: row.get(3)?,
                arrival_ms: row.get(4)?,
                departure_ms: row.get(5)?,
                category: category.parse().unwrap_or(VisitCategory::Other),
                resolved_address: row.get(7)?,
                user_label: row.get(8)?,
                user_notes: row.get(9)?,
                is_favorite: row.get::<_, i32>(10)? != 0,
                trip_id: trip_id.and_then(|t| t.parse().ok()),
                version: row.get(12)?,
                device_id: row.get(13)?,
                updated_at: row.get(14)?,
            },
            base_version: row.get(15)?,
            is_deleted: row.get::<_, i32>(16)? != 0,
        })
    }

    fn write_row(&self, stored: &StoredVisit, upsert: bool) -> Result<()> {
        let v = &stored.visit;
        let verb = if upsert { "INSERT OR REPLACE" } else { "INSERT" };
        self.conn.execute(
            &format!(
                "{verb} INTO visits
                     (id, center_lat, center_lon, radius_m, arrival_ms, departure_ms,
                      category, resolved_address, user_label, user_notes, is_favorite,
                      trip_id, version, device_id, updated_at, base_version, is_deleted)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                v.id.as_str(),
                v.center_lat,
                v.center_lon,
                v.radius_m,
                v.arrival_ms,
                v.departure_ms,
                v.category.as_str(),
                v.resolved_address,
                v.user_label,
                v.user_notes,
                i32::from(v.is_favorite),
                v.trip_id.map(|t| t.as_str()),
                v.version,
                v.device_id,
                v.updated_at,
                stored.base_version,
                i32::from(stored.is_deleted),
            ],
        )?;
        Ok(())
    }

    const SELECT: &'static str = "SELECT id, center_lat, center_lon, radius_m, arrival_ms,
            departure_ms, category, resolved_address, user_label, user_notes, is_favorite,
            trip_id, version, device_id, updated_at, base_version, is_deleted
         FROM visits";
}

impl VisitRepository for SqliteVisitRepository<'_> {
    fn insert(&self, visit: &PlaceVisit) -> Result<()> {
        visit.validate()?;
        self.write_row(
            &StoredVisit {
                visit: visit.clone(),
                base_version: 0,
                is_deleted: false,
            },
            false,
        )
    }

    fn update(&self, visit: &PlaceVisit) -> Result<()> {
        visit.validate()?;
        let existing = self
            .get_stored(&visit.id)?
            .ok_or_else(|| Error::not_found("visit", visit.id.to_string()))?;
        self.write_row(
            &StoredVisit {
                visit: visit.clone(),
                base_version: existing.base_version,
                is_deleted: existing.is_deleted,
            },
            true,
        )
    }

    fn get(&self, id: &VisitId) -> Result<Option<PlaceVisit>> {
        Ok(self
            .get_stored(id)?
            .filter(|s| !s.is_deleted)
            .map(|s| s.visit))
    }

    fn get_stored(&self, id: &VisitId) -> Result<Option<StoredVisit>> {
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

    fn list_in_window(&self, start_ms: i64, end_ms: i64) -> Result<Vec<PlaceVisit>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE is_deleted = 0 AND arrival_ms >= ? AND arrival_ms < ?
             ORDER BY arrival_ms ASC",
            Self::SELECT
        ))?;

        let visits = stmt
            .query_map(params![start_ms, end_ms], Self::parse_stored)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|s| s.visit)
            .collect();

        Ok(visits)
    }

    fn ongoing(&self) -> Result<Option<PlaceVisit>> {
        let stored = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE is_deleted = 0 AND departure_ms IS NULL
                     ORDER BY arrival_ms DESC LIMIT 1",
                    Self::SELECT
                ),
                [],
                Self::parse_stored,
            )
            .optional()?;
        Ok(stored.map(|s| s.visit))
    }

    fn latest_departed_before(&self, ms: i64) -> Result<Option<PlaceVisit>> {
        let stored = self
            .conn
            .query_row(
                &format!(
                    "{} WHERE is_deleted = 0 AND departure_ms IS NOT NULL AND departure_ms <= ?
                     ORDER BY departure_ms DESC LIMIT 1",
                    Self::SELECT
                ),
                params![ms],
                Self::parse_stored,
            )
            .optional()?;
        Ok(stored.map(|s| s.visit))
    }

    fn assign_trip(&self, ids: &[VisitId], trip_id: Option<TripId>) -> Result<()> {
        for id in ids {
            self.conn.execute(
                "UPDATE visits SET trip_id = ? WHERE id = ?",
                params![trip_id.map(|t| t.as_str()), id.as_str()],
            )?;
        }
        Ok(())
    }

    fn mark_deleted(&self, id: &VisitId, device_id: &str) -> Result<()> {
        let mut stored = self
            .get_stored(id)?
            .ok_or_else(|| Error::not_found("visit", id.to_string()))?;
        stored.visit.touch(device_id);
        stored.is_deleted = true;
        self.write_row(&stored, true)
    }

    fn put(&self, stored: &StoredVisit) -> Result<()> {
        stored.visit.validate()?;
        self.write_row(stored, true)
    }

    fn apply_remote(&self, stored: &StoredVisit) -> Result<()> {
        self.put(&StoredVisit {
            visit: stored.visit.clone(),
            base_version: stored.visit.version,
            is_deleted: stored.is_deleted,
        })
    }

    fn set_base_version(&self, id: &VisitId, base_version: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE visits SET base_version = ? WHERE id = ?",
            params![base_version, id.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::geo::Coordinate;

    fn visit() -> PlaceVisit {
        PlaceVisit::new(
            Coordinate::new(51.5, -0.12),
            35.0,
            1_000,
            Some(601_000),
            "device-a",
        )
    }

    #[test]
    fn insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteVisitRepository::new(db.conn());

        let v = visit();
        repo.insert(&v).unwrap();

        let fetched = repo.get(&v.id).unwrap().unwrap();
        assert_eq!(fetched, v);
        let stored = repo.get_stored(&v.id).unwrap().unwrap();
        assert_eq!(stored.base_version, 0);
    }

    #[test]
    fn insert_rejects_invalid_visit() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteVisitRepository::new(db.conn());

        let mut v = visit();
        v.radius_m = -5.0;
        assert!(matches!(
            repo.insert(&v),
            Err(Error::InvalidEntity { kind: "visit", .. })
        ));
        // The offending row never lands in the store.
        assert!(repo.get(&v.id).unwrap().is_none());
    }

    #[test]
    fn list_in_window_orders_by_arrival() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteVisitRepository::new(db.conn());

        let mut early = visit();
        early.arrival_ms = 1_000;
        early.departure_ms = Some(2_000);
        let mut late = visit();
        late.arrival_ms = 5_000;
        late.departure_ms = Some(6_000);

        repo.insert(&late).unwrap();
        repo.insert(&early).unwrap();

        let listed = repo.list_in_window(0, 10_000).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, early.id);
        assert_eq!(listed[1].id, late.id);

        // Half-open window excludes arrivals at end_ms
        let listed = repo.list_in_window(0, 5_000).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn tombstones_hide_from_queries() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteVisitRepository::new(db.conn());

        let v = visit();
        repo.insert(&v).unwrap();
        repo.mark_deleted(&v.id, "device-a").unwrap();

        assert!(repo.get(&v.id).unwrap().is_none());
        let stored = repo.get_stored(&v.id).unwrap().unwrap();
        assert!(stored.is_deleted);
        assert_eq!(stored.visit.version, 2);
    }

    #[test]
    fn apply_remote_sets_base_version() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteVisitRepository::new(db.conn());

        let mut v = visit();
        v.version = 7;
        repo.apply_remote(&StoredVisit {
            visit: v.clone(),
            base_version: 0,
            is_deleted: false,
        })
        .unwrap();

        let stored = repo.get_stored(&v.id).unwrap().unwrap();
        assert_eq!(stored.base_version, 7);
        assert_eq!(stored.visit.version, 7);
    }

    #[test]
    fn assign_trip_links_and_clears() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteVisitRepository::new(db.conn());

        let v = visit();
        repo.insert(&v).unwrap();
        let trip = TripId::new();

        repo.assign_trip(&[v.id], Some(trip)).unwrap();
        assert_eq!(repo.get(&v.id).unwrap().unwrap().trip_id, Some(trip));

        repo.assign_trip(&[v.id], None).unwrap();
        assert_eq!(repo.get(&v.id).unwrap().unwrap().trip_id, None);
    }
}
