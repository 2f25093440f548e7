//! Sync bookkeeping models: conflicts and per-device state

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a recorded sync conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConflictId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The kinds of entities that participate in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Visit,
    Segment,
    Trip,
}

impl EntityKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Visit => "visit",
            Self::Segment => "segment",
            Self::Trip => "trip",
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "visit" => Ok(Self::Visit),
            "segment" => Ok(Self::Segment),
            "trip" => Ok(Self::Trip),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How two versions of an entity came to disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides edited the same entity while apart.
    ConcurrentModification,
    /// One side deleted what the other side edited.
    DeletionConflict,
    /// The remote's stored version does not match what this device last pulled.
    VersionMismatch,
}

impl ConflictKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConcurrentModification => "concurrent_modification",
            Self::DeletionConflict => "deletion_conflict",
            Self::VersionMismatch => "version_mismatch",
        }
    }
}

impl FromStr for ConflictKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "concurrent_modification" => Ok(Self::ConcurrentModification),
            "deletion_conflict" => Ok(Self::DeletionConflict),
            "version_mismatch" => Ok(Self::VersionMismatch),
            other => Err(format!("unknown conflict kind: {other}")),
        }
    }
}

/// One side of a conflict: a full snapshot plus its version stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSide {
    /// Full entity snapshot as stored/transmitted.
    pub snapshot: serde_json::Value,
    pub version: i64,
    pub device_id: String,
    pub updated_at: i64,
    /// Tombstone marker; a deleted side still carries its last snapshot.
    pub is_deleted: bool,
}

/// A detected concurrent-edit conflict awaiting user resolution.
///
/// Created by the sync coordinator when version stamps diverge; destroyed
/// when one of the three resolution operations runs. Never auto-resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub id: ConflictId,
    pub entity: EntityKind,
    pub entity_id: String,
    pub kind: ConflictKind,
    pub local: ConflictSide,
    pub remote: ConflictSide,
    /// When the divergence was noticed, Unix ms.
    pub detected_at_ms: i64,
}

/// Process-wide sync progress for one device. Persisted; mutated only by the
/// sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeviceSyncState {
    pub device_id: String,
    /// Highest remote change sequence this device has pushed through.
    pub last_push_version: i64,
    /// Cursor into the remote change log for incremental pulls.
    pub last_pull_cursor: i64,
    /// Queued local changes not yet accepted by the remote.
    pub pending_push_count: i64,
    /// Unresolved conflicts awaiting the user.
    pub pending_conflict_count: i64,
}

impl DeviceSyncState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }
}
