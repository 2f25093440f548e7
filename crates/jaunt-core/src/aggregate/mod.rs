//! Period rollups: pure aggregation over closed sets of trips, visits, and
//! segments.
//!
//! Summaries carry no identity and no version; they are recomputed from
//! source records on demand and are deterministic for the same inputs.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::{PlaceVisit, RouteSegment, TransportType, Trip, VisitCategory};

/// A reporting period anchored at a calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day(NaiveDate),
    /// The ISO week containing the date.
    Week(NaiveDate),
    /// The calendar month containing the date.
    Month(NaiveDate),
}

impl Period {
    /// Half-open UTC window `[start_ms, end_ms)` covered by the period.
    pub fn window_ms(&self) -> (i64, i64) {
        let (start, end) = match self {
            Self::Day(date) => (*date, *date + Days::new(1)),
            Self::Week(date) => {
                let start = *date - Days::new(u64::from(date.weekday().num_days_from_monday()));
                (start, start + Days::new(7))
            }
            Self::Month(date) => {
                let start = date.with_day(1).unwrap_or(*date);
                let end = if start.month() == 12 {
                    start
                        .with_year(start.year() + 1)
                        .and_then(|d| d.with_month(1))
                } else {
                    start.with_month(start.month() + 1)
                }
                .unwrap_or(start + Days::new(31));
                (start, end)
            }
        };
        (date_to_ms(start), date_to_ms(end))
    }
}

fn date_to_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp_millis())
}

/// A ranked name with its occurrence count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub name: String,
    pub count: u64,
}

/// Immutable rollup of a period's activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period: Period,
    pub trip_count: u64,
    pub visit_count: u64,
    /// Sum of segment distances, meters.
    pub total_distance_m: f64,
    /// Sum of closed-trip durations, milliseconds.
    pub total_trip_duration_ms: i64,
    /// Visits per category.
    pub category_histogram: BTreeMap<VisitCategory, u64>,
    /// Distance per transport mode, meters.
    pub transport_histogram: BTreeMap<TransportType, f64>,
    /// Most visited places (by display name), best first.
    pub top_places: Vec<RankedEntry>,
    /// Most common categories, best first.
    pub top_categories: Vec<RankedEntry>,
}

/// Rolls a period's records into an immutable summary.
pub struct TripDayAggregator {
    top_n: usize,
}

impl TripDayAggregator {
    pub const fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    /// Aggregate the given records. Inputs are the period's closed set; the
    /// caller scopes them to the period window.
    pub fn summarize(
        &self,
        period: Period,
        trips: &[Trip],
        visits: &[PlaceVisit],
        segments: &[RouteSegment],
    ) -> PeriodSummary {
        let mut category_histogram: BTreeMap<VisitCategory, u64> = BTreeMap::new();
        let mut place_counts: BTreeMap<String, u64> = BTreeMap::new();
        for visit in visits {
            *category_histogram.entry(visit.category).or_default() += 1;
            *place_counts.entry(visit.display_name()).or_default() += 1;
        }

        let mut transport_histogram: BTreeMap<TransportType, f64> = BTreeMap::new();
        let mut total_distance_m = 0.0;
        for segment in segments {
            *transport_histogram.entry(segment.transport).or_default() += segment.distance_m;
            total_distance_m += segment.distance_m;
        }

        let total_trip_duration_ms = trips.iter().filter_map(Trip::duration_ms).sum();

        let top_places = rank(place_counts, self.top_n);
        let top_categories = rank(
            category_histogram
                .iter()
                .map(|(category, count)| (category.as_str().to_string(), *count))
                .collect(),
            self.top_n,
        );

        PeriodSummary {
            period,
            trip_count: trips.len() as u64,
            visit_count: visits.len() as u64,
            total_distance_m,
            total_trip_duration_ms,
            category_histogram,
            transport_histogram,
            top_places,
            top_categories,
        }
    }
}

impl Default for TripDayAggregator {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Deterministic top-N: count descending, then name ascending.
fn rank(counts: BTreeMap<String, u64>, top_n: usize) -> Vec<RankedEntry> {
    let mut entries: Vec<RankedEntry> = counts
        .into_iter()
        .map(|(name, count)| RankedEntry { name, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(top_n);
    entries
}
