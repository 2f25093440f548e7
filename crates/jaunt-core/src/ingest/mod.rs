//! Sample ingestion: dedupe, accuracy filtering, and debounce.
//!
//! Rejections here are filtering decisions, not failures; they are logged at
//! debug and counted, never surfaced as errors.

use serde::{Deserialize, Serialize};

use crate::config::TrackingConfig;
use crate::models::LocationSample;

/// Why a sample was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Horizontal accuracy worse than the configured threshold.
    LowAccuracy,
    /// Timestamp not after the last accepted sample.
    OutOfOrder,
    /// Within the minimum temporal and spatial delta of the previous sample.
    Debounced,
}

/// Outcome of offering one sample to the ingestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl IngestOutcome {
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Running counters for the ingest stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestStats {
    pub accepted: u64,
    pub rejected_accuracy: u64,
    pub rejected_out_of_order: u64,
    pub rejected_debounce: u64,
}

impl IngestStats {
    pub const fn rejected(&self) -> u64 {
        self.rejected_accuracy + self.rejected_out_of_order + self.rejected_debounce
    }
}

/// Stateful filter in front of the sample buffer.
///
/// Holds only the last accepted sample; accepted output is guaranteed to be
/// strictly increasing in time regardless of input order.
pub struct SampleIngestor {
    config: TrackingConfig,
    last_accepted: Option<LocationSample>,
    stats: IngestStats,
}

impl SampleIngestor {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            last_accepted: None,
            stats: IngestStats::default(),
        }
    }

    /// Resume from a previously accepted sample (e.g. after restart, seeded
    /// from the store) so ordering and debounce survive process boundaries.
    pub fn resume_from(config: TrackingConfig, last_accepted: Option<LocationSample>) -> Self {
        Self {
            config,
            last_accepted,
            stats: IngestStats::default(),
        }
    }

    /// Offer one sample. `Accepted` means the caller should append it to the
    /// sample buffer and feed it to detection.
    pub fn ingest(&mut self, sample: &LocationSample) -> IngestOutcome {
        if sample.accuracy_m > self.config.max_accuracy_m {
            self.stats.rejected_accuracy += 1;
            tracing::debug!(
                accuracy_m = sample.accuracy_m,
                threshold = self.config.max_accuracy_m,
                "sample rejected: low accuracy"
            );
            return IngestOutcome::Rejected(RejectReason::LowAccuracy);
        }

        if let Some(last) = &self.last_accepted {
            if sample.timestamp_ms <= last.timestamp_ms {
                self.stats.rejected_out_of_order += 1;
                tracing::debug!(
                    timestamp_ms = sample.timestamp_ms,
                    last_ms = last.timestamp_ms,
                    "sample rejected: out of order"
                );
                return IngestOutcome::Rejected(RejectReason::OutOfOrder);
            }

            let elapsed_ms = sample.timestamp_ms - last.timestamp_ms;
            let moved_m = sample.distance_m(last);
            if elapsed_ms < self.config.debounce_min_secs * 1000
                && moved_m < self.config.debounce_min_meters
            {
                self.stats.rejected_debounce += 1;
                tracing::debug!(elapsed_ms, moved_m, "sample rejected: debounce");
                return IngestOutcome::Rejected(RejectReason::Debounced);
            }
        }

        self.last_accepted = Some(*sample);
        self.stats.accepted += 1;
        IngestOutcome::Accepted
    }

    pub const fn stats(&self) -> IngestStats {
        self.stats
    }

    pub const fn last_accepted(&self) -> Option<&LocationSample> {
        self.last_accepted.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ingestor() -> SampleIngestor {
        SampleIngestor::new(TrackingConfig::default())
    }

    fn sample(ts: i64, lat: f64) -> LocationSample {
        LocationSample::new(lat, -0.12, 10.0, ts)
    }

    #[test]
    fn accepts_clean_ordered_samples() {
        let mut ing = ingestor();
        assert!(ing.ingest(&sample(1_000, 51.5)).is_accepted());
        assert!(ing.ingest(&sample(61_000, 51.501)).is_accepted());
        assert_eq!(ing.stats().accepted, 2);
    }

    #[test]
    fn rejects_low_accuracy() {
        let mut ing = ingestor();
        let mut s = sample(1_000, 51.5);
        s.accuracy_m = 250.0;
        assert_eq!(
            ing.ingest(&s),
            IngestOutcome::Rejected(RejectReason::LowAccuracy)
        );
    }

    #[test]
    fn rejects_out_of_order_and_duplicates() {
        let mut ing = ingestor();
        assert!(ing.ingest(&sample(10_000, 51.5)).is_accepted());
        assert_eq!(
            ing.ingest(&sample(10_000, 51.6)),
            IngestOutcome::Rejected(RejectReason::OutOfOrder)
        );
        assert_eq!(
            ing.ingest(&sample(5_000, 51.6)),
            IngestOutcome::Rejected(RejectReason::OutOfOrder)
        );
    }

    #[test]
    fn debounces_near_stationary_bursts() {
        let mut ing = ingestor();
        assert!(ing.ingest(&sample(1_000, 51.5)).is_accepted());
        // 1s later, same spot: noise
        assert_eq!(
            ing.ingest(&sample(2_000, 51.5)),
            IngestOutcome::Rejected(RejectReason::Debounced)
        );
        // 1s later but clearly moved: keep
        assert!(ing.ingest(&sample(3_000, 51.51)).is_accepted());
        // long after, same spot: heartbeat, keep
        assert!(ing.ingest(&sample(60_000, 51.51)).is_accepted());
    }

    #[test]
    fn accepted_sequence_is_strictly_increasing() {
        let mut ing = ingestor();
        let input = [1_000, 3_000, 2_000, 8_000, 8_000, 20_000];
        let mut accepted = Vec::new();
        for (i, ts) in input.into_iter().enumerate() {
            // Spread points out so debounce does not interfere
            let s = sample(ts, 51.5 + i as f64 * 0.01);
            if ing.ingest(&s).is_accepted() {
                accepted.push(ts);
            }
        }
        assert_eq!(accepted, vec![1_000, 3_000, 8_000, 20_000]);
        assert!(accepted.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn resume_preserves_ordering_guarantee() {
        let last = sample(50_000, 51.5);
        let mut ing = SampleIngestor::resume_from(TrackingConfig::default(), Some(last));
        assert_eq!(
            ing.ingest(&sample(40_000, 51.6)),
            IngestOutcome::Rejected(RejectReason::OutOfOrder)
        );
        assert!(ing.ingest(&sample(60_000, 51.6)).is_accepted());
    }
}
