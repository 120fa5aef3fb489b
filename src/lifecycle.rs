use std::sync::Arc;
use tracing::instrument;
use url::Url;

use crate::config::SessionConfig;
use crate::data::SessionStore;
use crate::error::AppError;
use crate::session::{now_millis, SessionDocument, SessionId};

/// Query parameter carrying the session id in share links.
pub const SESSION_QUERY_PARAM: &str = "game_id";

const HOUR_MS: i64 = 60 * 60 * 1000;

/// What a navigation URL says about which session to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLink {
    Found(SessionId),
    /// No usable `game_id`: missing or blank.
    Absent,
    /// A `game_id` was given but is not a valid id.
    Malformed(String),
}

/// Reads the `game_id` query parameter of a navigation URL.
pub fn inspect_session_link(url: &str) -> SessionLink {
    let Ok(url) = Url::parse(url) else {
        return SessionLink::Absent;
    };
    let Some(raw) = url
        .query_pairs()
        .find(|(name, _)| *name == SESSION_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
    else {
        return SessionLink::Absent;
    };

    if raw.trim().is_empty() {
        return SessionLink::Absent;
    }
    match raw.parse() {
        Ok(id) => SessionLink::Found(id),
        Err(e) => {
            tracing::warn!(value = %raw, error = %e, "Malformed session id in URL");
            SessionLink::Malformed(raw)
        }
    }
}

/// Extracts the session id from a navigation URL.
///
/// `None` means "no session here, act as the creator": the parameter is missing, blank,
/// or not a valid id.
pub fn discover_session_id(url: &str) -> Option<SessionId> {
    match inspect_session_link(url) {
        SessionLink::Found(id) => Some(id),
        SessionLink::Absent | SessionLink::Malformed(_) => None,
    }
}

/// Link the creator hands to the second player.
pub fn share_link(origin: &str, session_id: SessionId) -> String {
    format!("{}/?{}={}", origin.trim_end_matches('/'), SESSION_QUERY_PARAM, session_id)
}

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn SessionStore>,
    retention_ms: i64,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Self {
        Self { store, retention_ms: config.retention_hours.max(0) * HOUR_MS }
    }

    #[instrument(skip(self))]
    pub async fn create_session(&self) -> Result<SessionId, AppError> {
        let doc = SessionDocument::new(SessionId::new(), now_millis());
        self.store.create_session(&doc).await?;
        tracing::info!(session_id = %doc.session_id, "Session created");
        Ok(doc.session_id)
    }

    /// Oldest `updated_at` that survives a sweep run at `now`.
    pub fn retention_cutoff(&self, now: i64) -> i64 {
        now - self.retention_ms
    }

    /// Deletes every session last touched before `cutoff`. Running it again with the same
    /// cutoff deletes nothing new.
    #[instrument(skip(self))]
    pub async fn purge_stale(&self, cutoff: i64) -> Result<Vec<SessionId>, AppError> {
        let removed = self.store.purge_before(cutoff).await?;
        tracing::info!(cutoff, removed = removed.len(), "Retention sweep finished");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemorySessionStore;

    fn manager(store: Arc<MemorySessionStore>) -> LifecycleManager {
        LifecycleManager::new(store, &SessionConfig::default())
    }

    #[test]
    fn test_discover_session_id() {
        let id = SessionId::new();
        let url = format!("https://play.example.com/?game_id={}", id);
        assert_eq!(discover_session_id(&url), Some(id));

        let with_other_params = format!("https://play.example.com/board?lang=en&game_id={}#top", id);
        assert_eq!(discover_session_id(&with_other_params), Some(id));
    }

    #[test]
    fn test_discover_without_usable_id_means_create() {
        assert_eq!(discover_session_id("https://play.example.com/"), None);
        assert_eq!(discover_session_id("https://play.example.com/?game_id="), None);
        assert_eq!(discover_session_id("https://play.example.com/?game_id=%20%20"), None);
        assert_eq!(discover_session_id("https://play.example.com/?game_id=nope"), None);
        assert_eq!(discover_session_id("not a url"), None);
    }

    #[test]
    fn test_inspect_tells_mistyped_link_from_missing_one() {
        assert_eq!(inspect_session_link("https://play.example.com/"), SessionLink::Absent);
        assert_eq!(inspect_session_link("https://play.example.com/?game_id=%20"), SessionLink::Absent);
        assert_eq!(
            inspect_session_link("https://play.example.com/?game_id=nope"),
            SessionLink::Malformed("nope".to_string())
        );
    }

    #[test]
    fn test_share_link_round_trips_through_discovery() {
        let id = SessionId::new();
        let link = share_link("https://play.example.com/", id);
        assert_eq!(link, format!("https://play.example.com/?game_id={}", id));
        assert_eq!(discover_session_id(&link), Some(id));
    }

    #[tokio::test]
    async fn test_create_session_starts_empty() {
        let store = Arc::new(MemorySessionStore::new());
        let id = manager(store.clone()).create_session().await.unwrap();

        let doc = store.load_session(id).await.unwrap().unwrap();
        assert_eq!(doc.slot_count, 0);
        assert!(doc.state_blob.is_none());
        assert_eq!(doc.created_at, doc.updated_at);
    }

    #[tokio::test]
    async fn test_purge_boundary_and_idempotence() {
        let store = Arc::new(MemorySessionStore::new());
        let old = SessionDocument::new(SessionId::new(), 999);
        let at_cutoff = SessionDocument::new(SessionId::new(), 1_000);
        let fresh = SessionDocument::new(SessionId::new(), 5_000);
        for doc in [&old, &at_cutoff, &fresh] {
            store.create_session(doc).await.unwrap();
        }
        let manager = manager(store.clone());

        let removed = manager.purge_stale(1_000).await.unwrap();
        assert_eq!(removed, vec![old.session_id]);
        assert!(manager.purge_stale(1_000).await.unwrap().is_empty());

        assert!(store.load_session(old.session_id).await.unwrap().is_none());
        assert!(store.load_session(at_cutoff.session_id).await.unwrap().is_some());
        assert!(store.load_session(fresh.session_id).await.unwrap().is_some());
    }

    #[test]
    fn test_retention_cutoff_uses_configured_hours() {
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(store);
        assert_eq!(manager.retention_cutoff(4 * HOUR_MS), HOUR_MS);
    }
}
