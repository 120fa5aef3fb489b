use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::instrument;

use super::{SessionStore, SnapshotStream};
use crate::error::AppError;
use crate::session::{SessionDocument, SessionId, SessionSnapshot};

struct Entry {
    doc: SessionDocument,
    watchers: Vec<mpsc::UnboundedSender<SessionSnapshot>>,
}

impl Entry {
    // Called with the write lock held so watchers see commits in order.
    // Unbounded so a slow watcher still observes every commit.
    fn commit(&mut self) {
        let doc = &self.doc;
        self.watchers.retain(|tx| tx.send(doc.clone()).is_ok());
    }
}

/// Process-local store with the same conditional-write and notification contract as Redis.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    #[instrument(skip_all, fields(session_id = %doc.session_id))]
    async fn create_session(&self, doc: &SessionDocument) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(doc.session_id, Entry { doc: doc.clone(), watchers: Vec::new() });
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<SessionDocument>, AppError> {
        Ok(self.sessions.read().await.get(&id).map(|e| e.doc.clone()))
    }

    #[instrument(skip(self))]
    async fn compare_and_set_slot_count(
        &self,
        id: SessionId,
        expected: u32,
        new: u32,
        now: i64,
    ) -> Result<bool, AppError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(AppError::SessionNotFound(id))?;
        if entry.doc.slot_count != expected {
            return Ok(false);
        }
        entry.doc.slot_count = new;
        entry.doc.updated_at = now;
        entry.commit();
        Ok(true)
    }

    #[instrument(skip(self, blob))]
    async fn write_state(&self, id: SessionId, blob: String, now: i64) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(AppError::SessionNotFound(id))?;
        entry.doc.state_blob = Some(blob);
        entry.doc.updated_at = now;
        entry.commit();
        Ok(())
    }

    async fn watch_session(&self, id: SessionId) -> Result<SnapshotStream, AppError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id).ok_or(AppError::SessionNotFound(id))?;
        let initial = entry.doc.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        entry.watchers.push(tx);
        drop(sessions);

        // Purging the entry drops its senders, which ends the stream.
        let updates = futures::stream::unfold(rx, |mut rx| async move {
            let snapshot = rx.recv().await?;
            Some((Ok(snapshot), rx))
        });

        Ok(futures::stream::once(async move { Ok(initial) }).chain(updates).boxed())
    }

    #[instrument(skip(self))]
    async fn purge_before(&self, cutoff: i64) -> Result<Vec<SessionId>, AppError> {
        let mut sessions = self.sessions.write().await;
        let stale: Vec<SessionId> = sessions
            .iter()
            .filter(|(_, e)| e.doc.updated_at < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_expectation() {
        let store = MemorySessionStore::new();
        let doc = SessionDocument::new(SessionId::new(), 10);
        store.create_session(&doc).await.unwrap();

        assert!(store.compare_and_set_slot_count(doc.session_id, 0, 1, 11).await.unwrap());
        assert!(!store.compare_and_set_slot_count(doc.session_id, 0, 1, 12).await.unwrap());

        let stored = store.load_session(doc.session_id).await.unwrap().unwrap();
        assert_eq!(stored.slot_count, 1);
        assert_eq!(stored.updated_at, 11);
    }

    #[tokio::test]
    async fn test_write_to_missing_session_fails() {
        let store = MemorySessionStore::new();
        let result = store.write_state(SessionId::new(), "x".into(), 1).await;
        assert!(matches!(result, Err(AppError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_watch_starts_with_current_value_then_follows_commits() {
        let store = MemorySessionStore::new();
        let doc = SessionDocument::new(SessionId::new(), 10);
        store.create_session(&doc).await.unwrap();

        let mut stream = store.watch_session(doc.session_id).await.unwrap();
        store.compare_and_set_slot_count(doc.session_id, 0, 1, 11).await.unwrap();
        store.write_state(doc.session_id, "blob".into(), 12).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.slot_count, 0);
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.slot_count, 1);
        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third.state_blob.as_deref(), Some("blob"));
    }

    #[tokio::test]
    async fn test_watch_ends_when_session_is_purged() {
        let store = MemorySessionStore::new();
        let doc = SessionDocument::new(SessionId::new(), 10);
        store.create_session(&doc).await.unwrap();

        let mut stream = store.watch_session(doc.session_id).await.unwrap();
        let _ = stream.next().await;
        store.purge_before(100).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_watcher_sees_every_commit() {
        let store = MemorySessionStore::new();
        let doc = SessionDocument::new(SessionId::new(), 0);
        store.create_session(&doc).await.unwrap();

        let mut stream = store.watch_session(doc.session_id).await.unwrap();
        for n in 1..=200 {
            store.write_state(doc.session_id, format!("blob-{}", n), n).await.unwrap();
        }

        let initial = stream.next().await.unwrap().unwrap();
        assert!(initial.state_blob.is_none());
        for n in 1..=200 {
            let snapshot = stream.next().await.unwrap().unwrap();
            assert_eq!(snapshot.updated_at, n);
            assert_eq!(snapshot.state_blob, Some(format!("blob-{}", n)));
        }
    }

    #[tokio::test]
    async fn test_dropped_watchers_are_pruned() {
        let store = MemorySessionStore::new();
        let doc = SessionDocument::new(SessionId::new(), 0);
        store.create_session(&doc).await.unwrap();

        drop(store.watch_session(doc.session_id).await.unwrap());
        let _live = store.watch_session(doc.session_id).await.unwrap();
        store.write_state(doc.session_id, "blob".into(), 1).await.unwrap();

        let sessions = store.sessions.read().await;
        assert_eq!(sessions[&doc.session_id].watchers.len(), 1);
    }
}
