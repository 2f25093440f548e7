//! Raw location sample model

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// A single GPS fix as delivered by the platform location layer.
///
/// Samples are immutable once ingested; the ingestor owns ordering and
/// filtering, downstream components only ever read them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters (larger is worse).
    pub accuracy_m: f64,
    /// Fix time, Unix milliseconds.
    pub timestamp_ms: i64,
    /// Platform-reported speed in m/s, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    /// Platform-reported bearing in degrees, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing_deg: Option<f64>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            timestamp_ms,
            speed_mps: None,
            bearing_deg: None,
        }
    }

    #[must_use]
    pub const fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Distance in meters to another sample.
    pub fn distance_m(&self, other: &Self) -> f64 {
        self.coordinate().distance_m(&other.coordinate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_samples() {
        let a = LocationSample::new(51.5, -0.12, 10.0, 0);
        let b = LocationSample::new(51.50045, -0.12, 10.0, 60_000);
        let d = a.distance_m(&b);
        assert!(d > 45.0 && d < 55.0);
    }

    #[test]
    fn optional_fields_omitted_in_json() {
        let sample = LocationSample::new(51.5, -0.12, 10.0, 0);
        let json = serde_json::to_string(&sample).unwrap();
        assert!(!json.contains("speed_mps"));
        assert!(!json.contains("bearing_deg"));
    }
}
