//! Geocoding models

use serde::{Deserialize, Serialize};

/// Result of reverse geocoding a coordinate.
///
/// The degraded form (coordinates only, no address) is what callers get when
/// the provider is unreachable; geocoding is an enrichment, never a
/// correctness requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceInfo {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Provider POI kind (e.g. "cafe", "station"), input to category rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poi_kind: Option<String>,
}

impl PlaceInfo {
    /// A coordinates-only placeholder for provider failures.
    pub const fn degraded(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
            city: None,
            country: None,
            poi_kind: None,
        }
    }

    /// Whether the provider actually resolved an address.
    pub const fn is_resolved(&self) -> bool {
        self.address.is_some()
    }
}

/// A persisted reverse-geocode result keyed by coordinate bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeCacheEntry {
    pub bucket_key: String,
    pub place: PlaceInfo,
    /// When the entry was stored, Unix ms.
    pub cached_at_ms: i64,
    /// Entry lifetime in seconds.
    pub ttl_secs: i64,
}

impl GeocodeCacheEntry {
    /// Whether the entry is still fresh at `now_ms`.
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.cached_at_ms + self.ttl_secs * 1000
    }
}
