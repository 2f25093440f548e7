//! Tunable parameters for ingestion, detection, geocoding, and sync.
//!
//! Every threshold the pipeline uses lives here rather than as a hardcoded
//! constant, so the surrounding product can expose tracking-accuracy presets
//! without touching the core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Thresholds for sample filtering and visit/trip detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Samples with worse (larger) horizontal accuracy are rejected.
    pub max_accuracy_m: f64,
    /// Minimum seconds between accepted samples (debounce, combined with
    /// `debounce_min_meters` - a sample must clear both to be accepted).
    pub debounce_min_secs: i64,
    /// Minimum meters between accepted samples (debounce).
    pub debounce_min_meters: f64,
    /// Radius around the running centroid that keeps a stay-point candidate open.
    pub stay_radius_m: f64,
    /// Minimum dwell before a candidate becomes a visit.
    pub stay_min_duration_secs: i64,
    /// No samples for this long closes the open candidate at the last sample.
    pub gap_timeout_secs: i64,
    /// Silence longer than this emits a synthetic visit-end event.
    pub trip_ended_timeout_secs: i64,
    /// Speed band boundaries, km/h: walk < bands.0, bike < bands.1, car/train < bands.2.
    pub speed_bands_kmh: (f64, f64, f64),
    /// Minimum segment confidence to open a trip.
    pub trip_segment_min_confidence: f64,
    /// Minimum segment distance to open a trip.
    pub trip_min_distance_m: f64,
    /// Visit duration that closes a trip.
    pub trip_end_visit_secs: i64,
    /// Segments shorter than this on both sides mark a visit as a waypoint.
    pub waypoint_bracket_secs: i64,
    /// Accepted samples older than this may be pruned from the store.
    pub sample_retention_days: i64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 100.0,
            debounce_min_secs: 5,
            debounce_min_meters: 5.0,
            stay_radius_m: 50.0,
            stay_min_duration_secs: 300,
            gap_timeout_secs: 1800,
            trip_ended_timeout_secs: 6 * 3600,
            speed_bands_kmh: (7.0, 25.0, 120.0),
            trip_segment_min_confidence: 0.5,
            trip_min_distance_m: 500.0,
            trip_end_visit_secs: 2 * 3600,
            waypoint_bracket_secs: 900,
            sample_retention_days: 90,
        }
    }
}

/// Reverse-geocode cache behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeConfig {
    /// Decimal places both coordinates are rounded to for the cache key
    /// (5 decimal places is roughly 1.1m at the equator).
    pub bucket_precision: u32,
    /// In-memory LRU capacity over the persisted cache table.
    pub lru_capacity: usize,
    /// How long a resolved address stays fresh.
    pub ttl_secs: i64,
    /// How long a degraded (provider-failure) entry stays cached.
    pub failure_ttl_secs: i64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            bucket_precision: 5,
            lru_capacity: 512,
            ttl_secs: 30 * 24 * 3600,
            failure_ttl_secs: 3600,
        }
    }
}

/// Sync scheduling and retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Identifier of this device in version stamps and push envelopes.
    pub device_id: String,
    /// Base delay for exponential backoff on transient push failures.
    pub backoff_base_ms: u64,
    /// Backoff ceiling.
    pub backoff_cap_ms: u64,
    /// Attempts per entity within one sync cycle before the change is parked.
    pub max_push_attempts: u32,
    /// Entities pulled per page.
    pub pull_page_size: usize,
}

impl SyncSettings {
    /// Settings for a named device with default retry behavior.
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Backoff delay for the given zero-based attempt, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_cap_ms);
        Duration::from_millis(ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            device_id: "local".to_string(),
            backoff_base_ms: 1_000,
            backoff_cap_ms: 60_000,
            max_push_attempts: 5,
            pull_page_size: 200,
        }
    }
}
