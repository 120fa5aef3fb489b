use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::channel::decode_snapshot_state;
use crate::error::AppError;
use crate::session::{SessionDocument, SessionId, SessionSnapshot, Slot};

mod memory;
mod redis_store;

pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;

/// Ordered stream of full snapshots for one session. Ends when the session is deleted.
pub type SnapshotStream = BoxStream<'static, Result<SessionSnapshot, AppError>>;

// --- Store contract ---

/// The shared document store both devices talk to.
///
/// Only `compare_and_set_slot_count` is conditional; every other write is last-write-wins.
/// Every committed write must be observable through `watch_session` in commit order.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, doc: &SessionDocument) -> Result<(), AppError>;

    async fn load_session(&self, id: SessionId) -> Result<Option<SessionDocument>, AppError>;

    /// Writes `new` only if the stored count still equals `expected`.
    /// Returns `Ok(false)` when another writer got there first.
    async fn compare_and_set_slot_count(
        &self,
        id: SessionId,
        expected: u32,
        new: u32,
        now: i64,
    ) -> Result<bool, AppError>;

    async fn write_state(&self, id: SessionId, blob: String, now: i64) -> Result<(), AppError>;

    /// Yields the current snapshot first, then one snapshot per committed change.
    async fn watch_session(&self, id: SessionId) -> Result<SnapshotStream, AppError>;

    /// Deletes every session whose `updated_at` is strictly before `cutoff`.
    async fn purge_before(&self, cutoff: i64) -> Result<Vec<SessionId>, AppError>;
}

// --- DTOs (Data Transfer Objects) ---
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub link: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub assigned: bool,
    pub final_count: u32,
    pub slot: Option<Slot>,
}

#[derive(Debug, Deserialize)]
pub struct PurgeParams {
    pub key: Option<String>,
}

/// Snapshot as seen by browsers: the blob is decoded server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    pub session_id: SessionId,
    pub slot_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub state: Option<Value>,
}

impl SessionView {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            slot_count: snapshot.slot_count,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            state: decode_snapshot_state(snapshot),
        }
    }
}

// --- Websocket messages ---
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    PublishState(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Snapshot(SessionView),
    Error { message: String },
}
