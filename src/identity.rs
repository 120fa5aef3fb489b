//! Device-local memory of which seat this device holds in each session.
//!
//! Records are never synchronized and never overwritten: the first slot recorded for a
//! session stays, so a reload can skip the claim path entirely.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::error::AppError;
use crate::session::{SessionId, Slot};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn slot_for(&self, session_id: SessionId) -> Result<Option<Slot>, AppError>;

    /// Stores `slot` unless a record already exists; returns whichever slot is on record.
    async fn record(&self, session_id: SessionId, slot: Slot) -> Result<Slot, AppError>;
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    slots: Mutex<HashMap<SessionId, Slot>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn slot_for(&self, session_id: SessionId) -> Result<Option<Slot>, AppError> {
        Ok(self.slots.lock().await.get(&session_id).copied())
    }

    async fn record(&self, session_id: SessionId, slot: Slot) -> Result<Slot, AppError> {
        Ok(*self.slots.lock().await.entry(session_id).or_insert(slot))
    }
}

/// JSON file of `session_id -> slot label`, the on-disk analogue of browser local storage.
pub struct FileIdentityStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    async fn read_all(&self) -> Result<HashMap<SessionId, Slot>, AppError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, slots: &HashMap<SessionId, Slot>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(slots)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn slot_for(&self, session_id: SessionId) -> Result<Option<Slot>, AppError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.get(&session_id).copied())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn record(&self, session_id: SessionId, slot: Slot) -> Result<Slot, AppError> {
        let _guard = self.lock.lock().await;
        let mut slots = self.read_all().await?;
        if let Some(existing) = slots.get(&session_id) {
            if *existing != slot {
                tracing::warn!(session_id = %session_id, kept = %existing, ignored = %slot, "Slot already recorded");
            }
            return Ok(*existing);
        }
        slots.insert(session_id, slot);
        self.write_all(&slots).await?;
        tracing::debug!(session_id = %session_id, slot = %slot, "Recorded local slot");
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_record_keeps_first_slot() {
        let store = MemoryIdentityStore::new();
        let id = SessionId::new();
        assert_eq!(store.slot_for(id).await.unwrap(), None);
        assert_eq!(store.record(id, Slot::A).await.unwrap(), Slot::A);
        assert_eq!(store.record(id, Slot::B).await.unwrap(), Slot::A);
        assert_eq!(store.slot_for(id).await.unwrap(), Some(Slot::A));
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");
        let id = SessionId::new();
        let other = SessionId::new();

        {
            let store = FileIdentityStore::new(&path);
            store.record(id, Slot::B).await.unwrap();
            store.record(other, Slot::A).await.unwrap();
        }

        let reopened = FileIdentityStore::new(&path);
        assert_eq!(reopened.slot_for(id).await.unwrap(), Some(Slot::B));
        assert_eq!(reopened.slot_for(other).await.unwrap(), Some(Slot::A));
        assert_eq!(reopened.slot_for(SessionId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileIdentityStore::new(&path);
        assert!(matches!(store.slot_for(SessionId::new()).await, Err(AppError::Serde(_))));
    }
}
