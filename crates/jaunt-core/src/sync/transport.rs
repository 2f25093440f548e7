//! Transport to the remote sync service.
//!
//! `HttpSyncTransport` is the production client; `InMemoryRemote` implements
//! the same compare-and-swap contract in-process for tests and offline use.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use reqwest::StatusCode;

use crate::error::{Error, Result};
use crate::models::EntityKind;
use crate::util::{compact_text, is_http_url};

use super::protocol::{
    AcceptedChange, ChangeEnvelope, PullResponse, PushRequest, PushResponse, RejectedChange,
};

/// The remote sync service, as the coordinator sees it.
///
/// Implementations must uphold two guarantees: pushes are compare-and-swap
/// on version (never blind overwrites), and pulls return log order with a
/// resumable cursor.
pub trait SyncTransport: Send + Sync {
    fn push_changes(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = Result<PushResponse>> + Send;

    fn pull_changes(
        &self,
        since_cursor: i64,
        limit: usize,
    ) -> impl Future<Output = Result<PullResponse>> + Send;
}

impl<T: SyncTransport> SyncTransport for std::sync::Arc<T> {
    fn push_changes(
        &self,
        request: &PushRequest,
    ) -> impl Future<Output = Result<PushResponse>> + Send {
        (**self).push_changes(request)
    }

    fn pull_changes(
        &self,
        since_cursor: i64,
        limit: usize,
    ) -> impl Future<Output = Result<PullResponse>> + Send {
        (**self).pull_changes(since_cursor, limit)
    }
}

/// HTTP client for the remote sync service.
#[derive(Clone)]
pub struct HttpSyncTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSyncTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !is_http_url(&base_url) {
            return Err(Error::InvalidInput(
                "sync endpoint must include http:// or https://".to_string(),
            ));
        }
        Ok(Self {
            base_url,
            client: reqwest::Client::builder().build().map_err(transient)?,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), compact_text(&body));
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(Error::TransientSync(message))
        } else {
            Err(Error::Sync(message))
        }
    }
}

/// Network-layer failures are always worth retrying.
fn transient(error: reqwest::Error) -> Error {
    Error::TransientSync(error.to_string())
}

impl SyncTransport for HttpSyncTransport {
    async fn push_changes(&self, request: &PushRequest) -> Result<PushResponse> {
        let response = self
            .client
            .post(format!("{}/v1/changes", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(transient)?;
        let response = Self::check(response).await?;
        response.json().await.map_err(transient)
    }

    async fn pull_changes(&self, since_cursor: i64, limit: usize) -> Result<PullResponse> {
        let response = self
            .client
            .get(format!("{}/v1/changes", self.base_url))
            .query(&[("since", since_cursor.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(transient)?;
        let response = Self::check(response).await?;
        response.json().await.map_err(transient)
    }
}

#[derive(Default)]
struct RemoteState {
    /// Current state per entity.
    entities: HashMap<(EntityKind, String), ChangeEnvelope>,
    /// Append-only change log; index + 1 is the cursor.
    log: Vec<ChangeEnvelope>,
    /// Transient failures to inject before the next success.
    failures_remaining: u32,
}

/// In-process remote with real compare-and-swap semantics.
///
/// Backs the sync tests; also documents exactly what the server side must
/// do for the coordinator's guarantees to hold.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` requests fail with a transient error.
    pub fn inject_failures(&self, count: u32) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failures_remaining = count;
    }

    /// Current remote version for an entity (0 when unknown).
    pub fn version_of(&self, entity: EntityKind, entity_id: &str) -> i64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .entities
            .get(&(entity, entity_id.to_string()))
            .map_or(0, |e| e.version)
    }

    /// Snapshot of the remote's stored envelope for an entity.
    pub fn envelope_of(&self, entity: EntityKind, entity_id: &str) -> Option<ChangeEnvelope> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.entities.get(&(entity, entity_id.to_string())).cloned()
    }

    pub fn log_len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).log.len()
    }

    fn take_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl SyncTransport for InMemoryRemote {
    async fn push_changes(&self, request: &PushRequest) -> Result<PushResponse> {
        if self.take_failure() {
            return Err(Error::TransientSync("injected failure".to_string()));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut response = PushResponse::default();

        for change in &request.changes {
            let key = (
                change.envelope.entity,
                change.envelope.entity_id.clone(),
            );
            let current_version = state.entities.get(&key).map_or(0, |e| e.version);

            if current_version == change.expected_version {
                state.entities.insert(key, change.envelope.clone());
                state.log.push(change.envelope.clone());
                response.accepted.push(AcceptedChange {
                    entity: change.envelope.entity,
                    entity_id: change.envelope.entity_id.clone(),
                    log_seq: state.log.len() as i64,
                });
            } else {
                // CAS mismatch: hand back both versions, never overwrite.
                let remote = state
                    .entities
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| change.envelope.clone());
                response.conflicts.push(RejectedChange {
                    expected_version: change.expected_version,
                    remote,
                });
            }
        }

        Ok(response)
    }

    async fn pull_changes(&self, since_cursor: i64, limit: usize) -> Result<PullResponse> {
        if self.take_failure() {
            return Err(Error::TransientSync("injected failure".to_string()));
        }

        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let start = usize::try_from(since_cursor.max(0)).unwrap_or(usize::MAX);
        let changes: Vec<ChangeEnvelope> = state
            .log
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect();
        let new_cursor = since_cursor.max(0) + changes.len() as i64;

        Ok(PullResponse {
            changes,
            new_cursor,
        })
    }
}
