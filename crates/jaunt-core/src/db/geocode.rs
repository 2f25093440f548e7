//! Persisted reverse-geocode cache table

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::GeocodeCacheEntry;

/// Trait for the persistent tier of the geocode cache
pub trait GeocodeRepository {
    /// Fresh entry for the bucket, if any. Expired rows are removed on read.
    fn get_fresh(&self, bucket_key: &str, now_ms: i64) -> Result<Option<GeocodeCacheEntry>>;

    /// Store or refresh an entry (last write wins).
    fn upsert(&self, entry: &GeocodeCacheEntry) -> Result<()>;

    /// Remove every expired row. Returns rows removed.
    fn purge_expired(&self, now_ms: i64) -> Result<usize>;

    fn count(&self) -> Result<usize>;
}

/// SQLite implementation of `GeocodeRepository`
pub struct SqliteGeocodeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteGeocodeRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl GeocodeRepository for SqliteGeocodeRepository<'_> {
    fn get_fresh(&self, bucket_key: &str, now_ms: i64) -> Result<Option<GeocodeCacheEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT bucket_key, place, cached_at_ms, ttl_secs
                 FROM geocode_cache WHERE bucket_key = ?",
                params![bucket_key],
                |row| {
                    let place: String = row.get(1)?;
                    Ok((
                        place,
                        GeocodeCacheEntry {
                            bucket_key: row.get(0)?,
                            place: crate::models::PlaceInfo::degraded(0.0, 0.0),
                            cached_at_ms: row.get(2)?,
                            ttl_secs: row.get(3)?,
                        },
                    ))
                },
            )
            .optional()?;

        let Some((place_json, mut entry)) = entry else {
            return Ok(None);
        };
        entry.place = serde_json::from_str(&place_json)?;

        if entry.is_fresh(now_ms) {
            Ok(Some(entry))
        } else {
            self.conn.execute(
                "DELETE FROM geocode_cache WHERE bucket_key = ?",
                params![bucket_key],
            )?;
            Ok(None)
        }
    }

    fn upsert(&self, entry: &GeocodeCacheEntry) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO geocode_cache (bucket_key, place, cached_at_ms, ttl_secs)
             VALUES (?, ?, ?, ?)",
            params![
                entry.bucket_key,
                serde_json::to_string(&entry.place)?,
                entry.cached_at_ms,
                entry.ttl_secs,
            ],
        )?;
        Ok(())
    }

    fn purge_expired(&self, now_ms: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM geocode_cache WHERE cached_at_ms + ttl_secs * 1000 <= ?",
            params![now_ms],
        )?;
        Ok(removed)
    }

    fn count(&self) -> Result<usize> {
        let count: usize =
            self.conn
                .query_row("SELECT COUNT(*) FROM geocode_cache", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::PlaceInfo;

    fn entry(key: &str, cached_at_ms: i64, ttl_secs: i64) -> GeocodeCacheEntry {
        GeocodeCacheEntry {
            bucket_key: key.to_string(),
            place: PlaceInfo {
                latitude: 51.5,
                longitude: -0.12,
                address: Some("1 Harbour St".to_string()),
                city: Some("London".to_string()),
                country: Some("GB".to_string()),
                poi_kind: Some("cafe".to_string()),
            },
            cached_at_ms,
            ttl_secs,
        }
    }

    #[test]
    fn upsert_and_get_fresh() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteGeocodeRepository::new(db.conn());

        repo.upsert(&entry("a", 1_000, 60)).unwrap();
        let fetched = repo.get_fresh("a", 2_000).unwrap().unwrap();
        assert_eq!(fetched.place.address.as_deref(), Some("1 Harbour St"));
    }

    #[test]
    fn expired_entries_evict_on_read() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteGeocodeRepository::new(db.conn());

        repo.upsert(&entry("a", 1_000, 1)).unwrap();
        assert!(repo.get_fresh("a", 10_000).unwrap().is_none());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn purge_removes_only_expired() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteGeocodeRepository::new(db.conn());

        repo.upsert(&entry("old", 0, 1)).unwrap();
        repo.upsert(&entry("new", 100_000, 3_600)).unwrap();

        let removed = repo.purge_expired(50_000).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.count().unwrap(), 1);
    }
}
