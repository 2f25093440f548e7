//! Local store: connection management, migrations, and repositories.
//!
//! The store is the shared-resource boundary of the whole system (ingestion,
//! detection, queries, and sync never hold references to each other's state;
//! they meet here, one transaction per logical operation).

mod connection;
mod geocode;
mod migrations;
mod samples;
mod segments;
mod sync_state;
mod trips;
mod visits;

pub use connection::{Database, SharedDatabase};
pub use geocode::{GeocodeRepository, SqliteGeocodeRepository};
pub use samples::{SampleRepository, SqliteSampleRepository};
pub use segments::{SegmentRepository, SqliteSegmentRepository, StoredSegment};
pub use sync_state::{PendingChange, SqliteSyncStateRepository, SyncStateRepository};
pub use trips::{SqliteTripRepository, StoredTrip, TripRepository};
pub use visits::{SqliteVisitRepository, StoredVisit, VisitRepository};
