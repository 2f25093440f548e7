//! Route segment model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geo::Coordinate;
use crate::util::unix_millis_now;

/// A unique identifier for a route segment, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(Uuid);

impl SegmentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SegmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SegmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Inferred mode of transport for a route segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Walk,
    Bike,
    /// Car and train share a speed band; GPS alone cannot split them.
    CarOrTrain,
    Plane,
    /// Degraded inference (no samples in the gap).
    #[default]
    Unknown,
}

impl TransportType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Walk => "walk",
            Self::Bike => "bike",
            Self::CarOrTrain => "car_or_train",
            Self::Plane => "plane",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for TransportType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "walk" => Self::Walk,
            "bike" => Self::Bike,
            "car_or_train" => Self::CarOrTrain,
            "plane" => Self::Plane,
            _ => Self::Unknown,
        })
    }
}

/// The connective path between two place visits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub id: SegmentId,
    /// Segment start, Unix ms.
    pub start_ms: i64,
    /// Segment end, Unix ms.
    pub end_ms: i64,
    pub transport: TransportType,
    pub distance_m: f64,
    /// Fraction of gap samples consistent with the inferred transport band.
    pub confidence: f64,
    pub start_coord: Coordinate,
    pub end_coord: Coordinate,
    pub trip_id: Option<super::TripId>,
    pub version: i64,
    pub device_id: String,
    pub updated_at: i64,
}

impl RouteSegment {
    pub fn new(
        start_ms: i64,
        end_ms: i64,
        start_coord: Coordinate,
        end_coord: Coordinate,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            id: SegmentId::new(),
            start_ms,
            end_ms,
            transport: TransportType::Unknown,
            distance_m: 0.0,
            confidence: 0.0,
            start_coord,
            end_coord,
            trip_id: None,
            version: 1,
            device_id: device_id.into(),
            updated_at: unix_millis_now(),
        }
    }

    pub const fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    /// Bump the version stamp after a local mutation.
    pub fn touch(&mut self, device_id: &str) {
        self.version += 1;
        self.device_id = device_id.to_string();
        self.updated_at = unix_millis_now();
    }

    /// Store-boundary invariants: ordered times, non-negative distance,
    /// confidence within the unit interval.
    pub fn validate(&self) -> Result<()> {
        if self.start_ms >= self.end_ms {
            return Err(Error::invalid("segment", "start must precede end"));
        }
        if self.distance_m < 0.0 {
            return Err(Error::invalid("segment", "distance must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::invalid("segment", "confidence must be in [0, 1]"));
        }
        if self.version < 1 {
            return Err(Error::invalid("segment", "version must be at least 1"));
        }
        Ok(())
    }
}
