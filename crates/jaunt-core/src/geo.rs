//! Geographic primitives: distances, speeds, and cache bucket keys.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to `other` in meters (haversine).
    pub fn distance_m(&self, other: &Self) -> f64 {
        haversine_distance_m(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Great-circle distance between two lat/lon pairs in meters.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Speed in meters/second over a hop, or `None` when timestamps don't advance.
pub fn hop_speed_mps(distance_m: f64, from_ms: i64, to_ms: i64) -> Option<f64> {
    let elapsed_ms = to_ms - from_ms;
    if elapsed_ms <= 0 {
        return None;
    }
    Some(distance_m / (elapsed_ms as f64 / 1000.0))
}

/// Convert meters/second to km/h.
pub fn mps_to_kmh(mps: f64) -> f64 {
    mps * 3.6
}

/// Cache key for a coordinate, rounded to `precision` decimal places.
///
/// Near-duplicate queries (within ~1.1m at 5 decimals) share a bucket so the
/// geocode cache hit rate stays high.
pub fn bucket_key(latitude: f64, longitude: f64, precision: u32) -> String {
    let scale = 10f64.powi(precision as i32);
    let lat = (latitude * scale).round() / scale;
    let lon = (longitude * scale).round() / scale;
    format!("{lat:.prec$},{lon:.prec$}", prec = precision as usize)
}
