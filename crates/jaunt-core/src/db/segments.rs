//! Route segment repository

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::geo::Coordinate;
use crate::models::{RouteSegment, SegmentId, TransportType, TripId};

/// A segment row as persisted: the entity plus sync bookkeeping columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSegment {
    pub segment: RouteSegment,
    pub base_version: i64,
    pub is_deleted: bool,
}

/// Trait for segment storage operations
pub trait SegmentRepository {
    fn insert(&self, segment: &RouteSegment) -> Result<()>;
    fn update(&self, segment: &RouteSegment) -> Result<()>;
    fn get(&self, id: &SegmentId) -> Result<Option<RouteSegment>>;
    fn get_stored(&self, id: &SegmentId) -> Result<Option<StoredSegment>>;
    /// Live segments starting in `[start_ms, end_ms)`, ordered by start.
    fn list_in_window(&self, start_ms: i64, end_ms: i64) -> Result<Vec<RouteSegment>>;
    fn assign_trip(&self, ids: &[SegmentId], trip_id: Option<TripId>) -> Result<()>;
    fn mark_deleted(&self, id: &SegmentId, device_id: &str) -> Result<()>;
    /// Write a row exactly as given (entity, base version, tombstone flag).
    fn put(&self, stored: &StoredSegment) -> Result<()>;
    fn apply_remote(&self, stored: &StoredSegment) -> Result<()>;
    fn set_base_version(&self, id: &SegmentId, base_version: i64) -> Result<()>;
}

/// SQLite implementation of `SegmentRepository`
pub struct SqliteSegmentRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSegmentRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    const SELECT: &'static str = "SELECT id, start_ms, end_ms, transport, distance_m, confidence,
            start_lat, start_lon, end_lat, end_lon, trip_id, version, device_id, updated_at,
            base_version, is_deleted
         FROM segments";

    fn parse_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredSegment> {
        let id: String = row.get(0)?;
        let transport: String = row.get(3)?;
        let trip_id: Option<String> = row.get(10)?;
        Ok(StoredSegment {
            segment: RouteSegment {
                id: id.parse().unwrap_or_default(),
                start_ms: row.get(1)?,
                end_ms: row.get(2)?,
                transport: transport.parse().unwrap_or(TransportType::Unknown),
                distance_m: row.get(4)?,
                confidence: row.get(5)?,
                start_coord: Coordinate::new(row.get(6)?, row.get(7)?),
                end_coord: Coordinate::new(row.get(8)?, row.get(9)?),
                trip_id: trip_id.and_then(|t| t.parse().ok()),
                version: row.get(11)?,
                device_id: row.get(12)?,
                updated_at: row.get(13)?,
            },
            base_version: row.get(14)?,
            is_deleted: row.get::<_, i32>(15)? != 0,
        })
    }

    fn write_row(&self, stored: &StoredSegment) -> Result<()> {
        let s = &stored.segment;
        self.conn.execute(
            "INSERT OR REPLACE INTO segments
                 (id, start_ms, end_ms, transport, distance_m, confidence,
                  start_lat, start_lon, end_lat, end_lon, trip_id,
                  version, device_id, updated_at, base_version, is_deleted)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                s.id.as_str(),
                s.start_ms,
                s.end_ms,
                s.transport.as_str(),
                s.distance_m,
                s.confidence,
                s.start_coord.latitude,
                s.start_coord.longitude,
                s.end_coord.latitude,
                s.end_coord.longitude,
                s.trip_id.map(|t| t.as_str()),
                s.version,
                s.device_id,
                s.updated_at,
                stored.base_version,
                i32::from(stored.is_deleted),
            ],
        )?;
        Ok(())
    }
}

impl SegmentRepository for SqliteSegmentRepository<'_> {
    fn insert(&self, segment: &RouteSegment) -> Result<()> {
        segment.validate()?;
        self.write_row(&StoredSegment {
            segment: segment.clone(),
            base_version: 0,
            is_deleted: false,
        })
    }

    fn update(&self, segment: &RouteSegment) -> Result<()> {
        segment.validate()?;
        let existing = self
            .get_stored(&segment.id)?
            .ok_or_else(|| Error::not_found("segment", segment.id.to_string()))?;
        self.write_row(&StoredSegment {
            segment: segment.clone(),
            base_version: existing.base_version,
            is_deleted: existing.is_deleted,
        })
    }

    fn get(&self, id: &SegmentId) -> Result<Option<RouteSegment>> {
        Ok(self
            .get_stored(id)?
            .filter(|s| !s.is_deleted)
            .map(|s| s.segment))
    }

    fn get_stored(&self, id: &SegmentId) -> Result<Option<StoredSegment>> {
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

    fn list_in_window(&self, start_ms: i64, end_ms: i64) -> Result<Vec<RouteSegment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE is_deleted = 0 AND start_ms >= ? AND start_ms < ?
             ORDER BY start_ms ASC",
            Self::SELECT
        ))?;

        let segments = stmt
            .query_map(params![start_ms, end_ms], Self::parse_stored)?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .map(|s| s.segment)
            .collect();

        Ok(segments)
    }

    fn assign_trip(&self, ids: &[SegmentId], trip_id: Option<TripId>) -> Result<()> {
        for id in ids {
            self.conn.execute(
                "UPDATE segments SET trip_id = ? WHERE id = ?",
                params![trip_id.map(|t| t.as_str()), id.as_str()],
            )?;
        }
        Ok(())
    }

    fn mark_deleted(&self, id: &SegmentId, device_id: &str) -> Result<()> {
        let mut stored = self
            .get_stored(id)?
            .ok_or_else(|| Error::not_found("segment", id.to_string()))?;
        stored.segment.touch(device_id);
        stored.is_deleted = true;
        self.write_row(&stored)
    }

    fn put(&self, stored: &StoredSegment) -> Result<()> {
        stored.segment.validate()?;
        self.write_row(stored)
    }

    fn apply_remote(&self, stored: &StoredSegment) -> Result<()> {
        self.put(&StoredSegment {
            segment: stored.segment.clone(),
            base_version: stored.segment.version,
            is_deleted: stored.is_deleted,
        })
    }

    fn set_base_version(&self, id: &SegmentId, base_version: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE segments SET base_version = ? WHERE id = ?",
            params![base_version, id.as_str()],
        )?;
        Ok(())
    }
}
