//! Reverse geocoding with a bucket-keyed, TTL-bounded two-tier cache.
//!
//! Geocoding is an enrichment: a provider outage degrades results to
//! coordinates-only place info, it never fails the caller.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::GeocodeConfig;
use crate::db::{Database, GeocodeRepository, SharedDatabase, SqliteGeocodeRepository};
use crate::error::Result;
use crate::geo::bucket_key;
use crate::models::{GeocodeCacheEntry, PlaceInfo};
use crate::util::unix_millis_now;

/// External geocoding service. May fail or return nothing; both are treated
/// as best-effort misses by the cache.
pub trait GeocodeProvider: Send + Sync {
    fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> impl std::future::Future<Output = Result<Option<PlaceInfo>>> + Send;
}

/// In-memory LRU tier over the persisted cache table.
///
/// Eviction scans linearly for the oldest access stamp; at a few hundred
/// entries that beats maintaining a linked list.
struct LruTier {
    capacity: usize,
    entries: HashMap<String, (GeocodeCacheEntry, u64)>,
    access_counter: u64,
}

impl LruTier {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    fn get(&mut self, key: &str) -> Option<GeocodeCacheEntry> {
        self.access_counter += 1;
        let counter = self.access_counter;
        self.entries.get_mut(key).map(|(entry, stamp)| {
            *stamp = counter;
            entry.clone()
        })
    }

    fn insert(&mut self, key: String, entry: GeocodeCacheEntry) {
        self.access_counter += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, stamp))| *stamp)
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (entry, self.access_counter));
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Resolution counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeocodeStats {
    pub memory_hits: u64,
    pub store_hits: u64,
    pub provider_calls: u64,
    pub provider_failures: u64,
}

/// `resolve` never fails for provider reasons: a miss that cannot be filled
/// returns a degraded coordinates-only `PlaceInfo`, cached with a short TTL
/// so a flapping provider is not hammered.
pub struct ReverseGeocodeCache<P> {
    provider: P,
    config: GeocodeConfig,
    db: SharedDatabase,
    lru: Mutex<LruTier>,
    stats: Mutex<GeocodeStats>,
}

impl<P: GeocodeProvider> ReverseGeocodeCache<P> {
    pub fn new(provider: P, config: GeocodeConfig, db: SharedDatabase) -> Self {
        let lru = Mutex::new(LruTier::new(config.lru_capacity));
        Self {
            provider,
            config,
            db,
            lru,
            stats: Mutex::new(GeocodeStats::default()),
        }
    }

    /// Resolve a coordinate to place info, best-effort.
    pub async fn resolve(&self, latitude: f64, longitude: f64) -> Result<PlaceInfo> {
        let key = bucket_key(latitude, longitude, self.config.bucket_precision);
        let now_ms = unix_millis_now();

        if let Some(entry) = self.lookup_memory(&key, now_ms) {
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).memory_hits += 1;
            return Ok(entry.place);
        }

        if let Some(entry) = self.lookup_store(&key, now_ms)? {
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).store_hits += 1;
            self.lru
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, entry.clone());
            return Ok(entry.place);
        }

        // Miss on both tiers: ask the provider. Failures degrade.
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.provider_calls += 1;
        }
        let (place, ttl_secs) = {
            match self.provider.reverse_geocode(latitude, longitude).await {
                Ok(Some(place)) => (place, self.config.ttl_secs),
                Ok(None) => (
                    PlaceInfo::degraded(latitude, longitude),
                    self.config.failure_ttl_secs,
                ),
                Err(error) => {
                    tracing::warn!(%error, "reverse geocode provider failed; degrading");
                    self.stats
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .provider_failures += 1;
                    (
                        PlaceInfo::degraded(latitude, longitude),
                        self.config.failure_ttl_secs,
                    )
                }
            }
        };

        let entry = GeocodeCacheEntry {
            bucket_key: key.clone(),
            place: place.clone(),
            cached_at_ms: now_ms,
            ttl_secs,
        };
        self.store(&key, &entry)?;
        Ok(place)
    }

    pub fn stats(&self) -> GeocodeStats {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn memory_len(&self) -> usize {
        self.lru.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lookup_memory(&self, key: &str, now_ms: i64) -> Option<GeocodeCacheEntry> {
        let mut lru = self.lru.lock().unwrap_or_else(|e| e.into_inner());
        match lru.get(key) {
            Some(entry) if entry.is_fresh(now_ms) => Some(entry),
            Some(_) => {
                lru.remove(key);
                None
            }
            None => None,
        }
    }

    fn lookup_store(&self, key: &str, now_ms: i64) -> Result<Option<GeocodeCacheEntry>> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        SqliteGeocodeRepository::new(db.conn()).get_fresh(key, now_ms)
    }

    /// Cache population is last-write-wins and idempotent; no coordination
    /// beyond the store's own transaction is needed.
    fn store(&self, key: &str, entry: &GeocodeCacheEntry) -> Result<()> {
        {
            let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
            SqliteGeocodeRepository::new(db.conn()).upsert(entry)?;
        }
        self.lru
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry.clone());
        Ok(())
    }
}

/// Provider that always misses; useful when no geocoding service is
/// configured.
pub struct NoopGeocodeProvider;

impl GeocodeProvider for NoopGeocodeProvider {
    async fn reverse_geocode(&self, _latitude: f64, _longitude: f64) -> Result<Option<PlaceInfo>> {
        Ok(None)
    }
}

/// Open a cache over a fresh handle to the given database.
pub fn cache_over<P: GeocodeProvider>(
    provider: P,
    config: GeocodeConfig,
    db: Database,
) -> ReverseGeocodeCache<P> {
    ReverseGeocodeCache::new(provider, config, db.into_shared())
}
