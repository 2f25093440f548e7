//! Offline-first synchronization engine.
//!
//! Local mutations queue in the store; [`SyncCoordinator`] pulls the remote
//! change log and pushes the queue with compare-and-swap version checks.
//! Divergence becomes a persisted [`crate::models::SyncConflict`] that only
//! [`ConflictResolver`] - driven by an explicit user decision - removes.

mod coordinator;
mod protocol;
mod resolver;
mod transport;

pub use coordinator::{CancelSource, CancelToken, SyncCoordinator, SyncReport};
pub use protocol::{
    AcceptedChange, ChangeEnvelope, PullResponse, PushChange, PushRequest, PushResponse,
    RejectedChange,
};
pub use resolver::{ConflictResolver, ResolutionOp};
pub use transport::{HttpSyncTransport, InMemoryRemote, SyncTransport};
