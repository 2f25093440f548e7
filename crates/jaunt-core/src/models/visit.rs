//! Place visit model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geo::Coordinate;
use crate::util::unix_millis_now;

/// A unique identifier for a place visit, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitId(Uuid);

impl VisitId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for VisitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VisitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Coarse category of a visited place, derived from geocoder POI kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum VisitCategory {
    Home,
    Work,
    Food,
    Shopping,
    Leisure,
    Transit,
    Lodging,
    Nature,
    #[default]
    Other,
}

impl VisitCategory {
    /// Rule-based mapping from a geocoder POI kind to a category.
    ///
    /// Pure function; unknown kinds fall through to `Other`.
    #[must_use]
    pub fn from_poi_kind(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "residential" | "house" | "apartments" => Self::Home,
            "office" | "industrial" | "coworking" => Self::Work,
            "restaurant" | "cafe" | "bar" | "fast_food" | "food_court" => Self::Food,
            "supermarket" | "mall" | "shop" | "marketplace" => Self::Shopping,
            "cinema" | "theatre" | "museum" | "stadium" | "gym" | "attraction" => Self::Leisure,
            "station" | "bus_station" | "airport" | "ferry_terminal" | "platform" => Self::Transit,
            "hotel" | "hostel" | "guest_house" | "camp_site" => Self::Lodging,
            "park" | "beach" | "forest" | "peak" | "viewpoint" => Self::Nature,
            _ => Self::Other,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Work => "work",
            Self::Food => "food",
            Self::Shopping => "shopping",
            Self::Leisure => "leisure",
            Self::Transit => "transit",
            Self::Lodging => "lodging",
            Self::Nature => "nature",
            Self::Other => "other",
        }
    }
}

impl FromStr for VisitCategory {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "home" => Self::Home,
            "work" => Self::Work,
            "food" => Self::Food,
            "shopping" => Self::Shopping,
            "leisure" => Self::Leisure,
            "transit" => Self::Transit,
            "lodging" => Self::Lodging,
            "nature" => Self::Nature,
            _ => Self::Other,
        })
    }
}

/// A detected stay at one place, possibly still ongoing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceVisit {
    pub id: VisitId,
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: f64,
    /// Arrival time, Unix ms.
    pub arrival_ms: i64,
    /// Departure time, Unix ms; `None` while the visit is ongoing.
    pub departure_ms: Option<i64>,
    pub category: VisitCategory,
    pub resolved_address: Option<String>,
    pub user_label: Option<String>,
    pub user_notes: Option<String>,
    pub is_favorite: bool,
    pub trip_id: Option<super::TripId>,
    /// Monotonic local logical clock for conflict detection.
    pub version: i64,
    /// Device that produced this version.
    pub device_id: String,
    /// Last update time, Unix ms.
    pub updated_at: i64,
}

impl PlaceVisit {
    /// Create a new visit detected at the given centroid.
    pub fn new(
        center: Coordinate,
        radius_m: f64,
        arrival_ms: i64,
        departure_ms: Option<i64>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            id: VisitId::new(),
            center_lat: center.latitude,
            center_lon: center.longitude,
            radius_m,
            arrival_ms,
            departure_ms,
            category: VisitCategory::Other,
            resolved_address: None,
            user_label: None,
            user_notes: None,
            is_favorite: false,
            trip_id: None,
            version: 1,
            device_id: device_id.into(),
            updated_at: unix_millis_now(),
        }
    }

    pub const fn center(&self) -> Coordinate {
        Coordinate::new(self.center_lat, self.center_lon)
    }

    /// Dwell duration in milliseconds, `None` while ongoing.
    pub fn duration_ms(&self) -> Option<i64> {
        self.departure_ms.map(|d| d - self.arrival_ms)
    }

    /// Bump the version stamp after a local mutation.
    pub fn touch(&mut self, device_id: &str) {
        self.version += 1;
        self.device_id = device_id.to_string();
        self.updated_at = unix_millis_now();
    }

    /// Display name preference: user label, then resolved address, then coordinates.
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(label) = &self.user_label {
            return label.clone();
        }
        if let Some(address) = &self.resolved_address {
            return address.clone();
        }
        format!("{:.5}, {:.5}", self.center_lat, self.center_lon)
    }

    /// Store-boundary invariants: positive radius, arrival before departure.
    pub fn validate(&self) -> Result<()> {
        if self.radius_m <= 0.0 {
            return Err(Error::invalid("visit", "radius must be positive"));
        }
        if let Some(departure) = self.departure_ms {
            if self.arrival_ms >= departure {
                return Err(Error::invalid("visit", "arrival must precede departure"));
            }
        }
        if self.version < 1 {
            return Err(Error::invalid("visit", "version must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn visit_id_roundtrip() {
        let id = VisitId::new();
        let parsed: VisitId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn new_visit_starts_at_version_one() {
        let v = visit();
        assert_eq!(v.version, 1);
        assert_eq!(v.duration_ms(), Some(600_000));
    }

    #[test]
    fn touch_bumps_version_and_device() {
        let mut v = visit();
        v.touch("device-b");
        assert_eq!(v.version, 2);
        assert_eq!(v.device_id, "device-b");
    }

    #[test]
    fn validate_rejects_inverted_times() {
        let mut v = visit();
        v.departure_ms = Some(500);
        assert!(v.validate().is_err());
        v.departure_ms = None; // ongoing visit is fine
        assert!(v.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_radius() {
        let mut v = visit();
        v.radius_m = 0.0;
        assert!(v.validate().is_err());
    }

    #[test]
    fn category_mapping_is_pure() {
        assert_eq!(VisitCategory::from_poi_kind("cafe"), VisitCategory::Food);
        assert_eq!(VisitCategory::from_poi_kind("CAFE"), VisitCategory::Food);
        assert_eq!(
            VisitCategory::from_poi_kind("submarine_pen"),
            VisitCategory::Other
        );
    }

    #[test]
    fn display_name_prefers_user_label() {
        let mut v = visit();
        assert!(v.display_name().starts_with("51.5"));
        v.resolved_address = Some("1 Harbour St".to_string());
        assert_eq!(v.display_name(), "1 Harbour St");
        v.user_label = Some("Favourite cafe".to_string());
        assert_eq!(v.display_name(), "Favourite cafe");
    }
}
