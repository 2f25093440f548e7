//! Wire types for the remote sync service.
//!
//! The contract that matters is compare-and-swap on version for pushes and
//! cursor-ordered pulls; the encoding itself is plain JSON envelopes.

use serde::{Deserialize, Serialize};

use crate::models::EntityKind;

/// One entity state in transit, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    pub entity: EntityKind,
    pub entity_id: String,
    pub version: i64,
    pub device_id: String,
    pub updated_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    /// Full entity snapshot.
    pub payload: serde_json::Value,
}

/// A local change offered to the remote with its CAS expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushChange {
    #[serde(flatten)]
    pub envelope: ChangeEnvelope,
    /// The remote version this device last saw for the entity; the remote
    /// accepts only if its stored version still matches.
    pub expected_version: i64,
}

/// `POST /v1/changes` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub device_id: String,
    pub changes: Vec<PushChange>,
}

/// A change the remote accepted, with its position in the remote log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedChange {
    pub entity: EntityKind,
    pub entity_id: String,
    /// Sequence assigned in the remote change log.
    pub log_seq: i64,
}

/// A CAS mismatch: the remote refused the push and returned its own state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedChange {
    /// What the pushing device expected the remote to hold.
    pub expected_version: i64,
    /// What the remote actually holds.
    pub remote: ChangeEnvelope,
}

/// `POST /v1/changes` response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PushResponse {
    pub accepted: Vec<AcceptedChange>,
    pub conflicts: Vec<RejectedChange>,
}

/// `GET /v1/changes?since=` response body. Changes are ordered by the remote
/// log sequence; `new_cursor` is the position after the last entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<ChangeEnvelope>,
    pub new_cursor: i64,
}
