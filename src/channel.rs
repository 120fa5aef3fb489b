use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::data::SessionStore;
use crate::error::AppError;
use crate::session::{codec, now_millis, SessionId, SessionSnapshot};

/// Handle to a running change listener. Dropping it cancels the listener.
#[derive(Debug)]
pub struct Subscription {
    session_id: SessionId,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Stops future deliveries. A callback already running finishes normally.
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Moves game state between one device and the shared session document.
#[derive(Clone)]
pub struct StateChannel {
    store: Arc<dyn SessionStore>,
}

impl StateChannel {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Calls `on_change` with the full snapshot now and after every committed change,
    /// including this device's own writes.
    #[instrument(skip(self, on_change))]
    pub async fn subscribe<F>(&self, session_id: SessionId, on_change: F) -> Result<Subscription, AppError>
    where
        F: FnMut(SessionSnapshot) + Send + 'static,
    {
        self.subscribe_until_closed(session_id, on_change, |_| {}).await
    }

    /// Like [`StateChannel::subscribe`], and calls `on_closed` once if the feed ends on its own:
    /// `None` when the session was deleted, `Some(error)` when the store connection failed.
    /// Cancelling the subscription does not call it.
    #[instrument(skip(self, on_change, on_closed))]
    pub async fn subscribe_until_closed<F, C>(
        &self,
        session_id: SessionId,
        mut on_change: F,
        on_closed: C,
    ) -> Result<Subscription, AppError>
    where
        F: FnMut(SessionSnapshot) + Send + 'static,
        C: FnOnce(Option<AppError>) + Send + 'static,
    {
        let mut snapshots = self.store.watch_session(session_id).await?;

        let task = tokio::spawn(async move {
            let mut failure = None;
            while let Some(next) = snapshots.next().await {
                match next {
                    Ok(snapshot) => on_change(snapshot),
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Change feed failed");
                        failure = Some(e);
                        break;
                    }
                }
            }
            tracing::debug!(session_id = %session_id, "Change feed closed");
            on_closed(failure);
        });

        Ok(Subscription { session_id, task })
    }

    /// Overwrites the session's state. Last write wins; there is no merge.
    #[instrument(skip(self, state))]
    pub async fn publish(&self, session_id: SessionId, state: &Value) -> Result<(), AppError> {
        let blob = codec::encode(state)?;
        tracing::debug!(session_id = %session_id, bytes = blob.len(), "Publishing state");
        self.store.write_state(session_id, blob, now_millis()).await
    }

    pub async fn snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot, AppError> {
        self.store
            .load_session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))
    }

    /// Reads the current state once. `None` when no game has started or the blob is unreadable.
    pub async fn current_state(&self, session_id: SessionId) -> Result<Option<Value>, AppError> {
        Ok(decode_snapshot_state(&self.snapshot(session_id).await?))
    }
}

/// Decodes the blob carried by a snapshot, treating an absent or corrupt blob as "no state yet".
pub fn decode_snapshot_state(snapshot: &SessionSnapshot) -> Option<Value> {
    let blob = snapshot.state_blob.as_deref()?;
    match codec::decode(blob) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!(session_id = %snapshot.session_id, error = %e, "Ignoring unreadable state blob");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemorySessionStore;
    use crate::session::SessionDocument;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn setup() -> (Arc<MemorySessionStore>, StateChannel, SessionId) {
        let store = Arc::new(MemorySessionStore::new());
        let doc = SessionDocument::new(SessionId::new(), now_millis());
        store.create_session(&doc).await.unwrap();
        let channel = StateChannel::new(store.clone());
        (store, channel, doc.session_id)
    }

    #[tokio::test]
    async fn test_subscriber_sees_own_publish() {
        let (_store, channel, id) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = channel.subscribe(id, move |snap| { let _ = tx.send(snap); }).await.unwrap();

        let initial = rx.recv().await.unwrap();
        assert!(initial.state_blob.is_none());
        assert_eq!(decode_snapshot_state(&initial), None);

        channel.publish(id, &json!({ "turn": 1 })).await.unwrap();
        let changed = rx.recv().await.unwrap();
        assert_eq!(decode_snapshot_state(&changed), Some(json!({ "turn": 1 })));
    }

    #[tokio::test]
    async fn test_cancel_stops_delivery() {
        let (_store, channel, id) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = channel.subscribe(id, move |snap| { let _ = tx.send(snap); }).await.unwrap();
        let _ = rx.recv().await.unwrap();

        sub.cancel();
        channel.publish(id, &json!({ "turn": 2 })).await.unwrap();

        // The sender lived inside the aborted task, so the channel closes without a delivery.
        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_feed_end_is_reported_after_purge() {
        let (store, channel, id) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = channel
            .subscribe_until_closed(id, |_| {}, move |failure| {
                let _ = tx.send(failure.is_none());
            })
            .await
            .unwrap();

        store.purge_before(i64::MAX).await.unwrap();
        let ended_cleanly = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(ended_cleanly, Some(true));
    }

    #[tokio::test]
    async fn test_corrupt_blob_reads_as_no_state() {
        let (store, channel, id) = setup().await;
        store.write_state(id, String::new(), now_millis()).await.unwrap();
        assert_eq!(channel.current_state(id).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_write_wins_despite_unrelated_traffic() {
        let (store, channel, id) = setup().await;

        let mut noise = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            let channel = channel.clone();
            noise.push(tokio::spawn(async move {
                let doc = SessionDocument::new(SessionId::new(), now_millis());
                store.create_session(&doc).await.unwrap();
                for turn in 0..20 {
                    channel.publish(doc.session_id, &json!({ "noise": n, "turn": turn })).await.unwrap();
                }
            }));
        }

        channel.publish(id, &json!({ "turn": 1 })).await.unwrap();
        let expected = json!({ "board": [[1, 0], [0, 2]], "turn": 2, "over": false });
        channel.publish(id, &expected).await.unwrap();

        for handle in noise {
            handle.await.unwrap();
        }
        assert_eq!(channel.current_state(id).await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn test_publish_to_missing_session_fails() {
        let (_store, channel, _) = setup().await;
        let result = channel.publish(SessionId::new(), &json!(null)).await;
        assert!(matches!(result, Err(AppError::SessionNotFound(_))));
    }
}
