//! Raw sample buffer repository

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::LocationSample;

/// Append-only store for accepted location samples.
///
/// Samples are keyed by timestamp: the ingestor guarantees strictly
/// increasing timestamps, so the key doubles as the ordering.
pub trait SampleRepository {
    /// Append an accepted sample.
    fn append(&self, sample: &LocationSample) -> Result<()>;

    /// Timestamp of the most recently accepted sample.
    fn last_timestamp(&self) -> Result<Option<i64>>;

    /// Samples with `start_ms <= timestamp < end_ms`, in order.
    fn list_between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<LocationSample>>;

    /// Drop samples older than the retention cutoff. Returns rows removed.
    fn prune_before(&self, cutoff_ms: i64) -> Result<usize>;

    /// Number of retained samples.
    fn count(&self) -> Result<usize>;
}

/// SQLite implementation of `SampleRepository`
pub struct SqliteSampleRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSampleRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocationSample> {
        Ok(LocationSample {
            timestamp_ms: row.get(0)?,
            latitude: row.get(1)?,
            longitude: row.get(2)?,
            accuracy_m: row.get(3)?,
            speed_mps: row.get(4)?,
            bearing_deg: row.get(5)?,
        })
    }
}

impl SampleRepository for SqliteSampleRepository<'_> {
    fn append(&self, sample: &LocationSample) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO samples
                 (timestamp_ms, latitude, longitude, accuracy_m, speed_mps, bearing_deg)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                sample.timestamp_ms,
                sample.latitude,
                sample.longitude,
                sample.accuracy_m,
                sample.speed_mps,
                sample.bearing_deg,
            ],
        )?;
        Ok(())
    }

    fn last_timestamp(&self) -> Result<Option<i64>> {
        let last = self
            .conn
            .query_row("SELECT MAX(timestamp_ms) FROM samples", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();
        Ok(last)
    }

    fn list_between(&self, start_ms: i64, end_ms: i64) -> Result<Vec<LocationSample>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp_ms, latitude, longitude, accuracy_m, speed_mps, bearing_deg
             FROM samples
             WHERE timestamp_ms >= ? AND timestamp_ms < ?
             ORDER BY timestamp_ms ASC",
        )?;

        let samples = stmt
            .query_map(params![start_ms, end_ms], Self::parse_sample)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(samples)
    }

    fn prune_before(&self, cutoff_ms: i64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM samples WHERE timestamp_ms < ?", [cutoff_ms])?;
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count)
    }
}
