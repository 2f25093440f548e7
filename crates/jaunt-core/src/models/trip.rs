//! Trip model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::unix_millis_now;

/// A unique identifier for a trip, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripId(Uuid);

impl TripId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TripId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TripId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One outing: a bounded run of visits and segments.
///
/// A trip only holds back-references; visits and segments own their records
/// and point at the trip via `trip_id`. Deleting a trip never cascades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    /// Trip start, Unix ms.
    pub start_ms: i64,
    /// Trip end, Unix ms; `None` while ongoing.
    pub end_ms: Option<i64>,
    pub display_name: String,
    pub is_ongoing: bool,
    /// False for trips the user created by hand; those are never touched by
    /// the detector.
    pub is_auto_detected: bool,
    pub tags: Vec<String>,
    pub summary: String,
    pub version: i64,
    pub device_id: String,
    pub updated_at: i64,
}

impl Trip {
    /// Open a new auto-detected trip starting at `start_ms`.
    pub fn auto_detected(start_ms: i64, device_id: impl Into<String>) -> Self {
        Self {
            id: TripId::new(),
            start_ms,
            end_ms: None,
            display_name: String::new(),
            is_ongoing: true,
            is_auto_detected: true,
            tags: Vec::new(),
            summary: String::new(),
            version: 1,
            device_id: device_id.into(),
            updated_at: unix_millis_now(),
        }
    }

    /// Create a user-authored trip with explicit boundaries.
    pub fn user_created(
        start_ms: i64,
        end_ms: i64,
        display_name: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            id: TripId::new(),
            start_ms,
            end_ms: Some(end_ms),
            display_name: display_name.into(),
            is_ongoing: false,
            is_auto_detected: false,
            tags: Vec::new(),
            summary: String::new(),
            version: 1,
            device_id: device_id.into(),
            updated_at: unix_millis_now(),
        }
    }

    /// Close the trip at the given time.
    pub fn close(&mut self, end_ms: i64) {
        self.end_ms = Some(end_ms);
        self.is_ongoing = false;
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_ms.map(|end| end - self.start_ms)
    }

    /// Bump the version stamp after a local mutation.
    pub fn touch(&mut self, device_id: &str) {
        self.version += 1;
        self.device_id = device_id.to_string();
        self.updated_at = unix_millis_now();
    }

    /// Store-boundary invariants: ongoing trips have no end, closed trips
    /// end no earlier than they start.
    pub fn validate(&self) -> Result<()> {
        match (self.is_ongoing, self.end_ms) {
            (true, Some(_)) => Err(Error::invalid("trip", "ongoing trip must not have an end")),
            (false, None) => Err(Error::invalid("trip", "closed trip must have an end")),
            (false, Some(end)) if end < self.start_ms => {
                Err(Error::invalid("trip", "end must not precede start"))
            }
            _ if self.version < 1 => Err(Error::invalid("trip", "version must be at least 1")),
            _ => Ok(()),
        }
    }
}
