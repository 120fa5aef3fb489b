use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::instrument;

use super::{SessionStore, SnapshotStream};
use crate::error::AppError;
use crate::session::{SessionDocument, SessionId};

/// Sorted set of session ids scored by `updated_at`; drives the retention sweep.
const UPDATED_INDEX: &str = "sessions:updated_at";

const FIELD_SLOT_COUNT: &str = "slot_count";
const FIELD_STATE_BLOB: &str = "state_blob";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_UPDATED_AT: &str = "updated_at";

const WRITE_STATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[1], 'state_blob', ARGV[1], 'updated_at', ARGV[2])
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
redis.call('PUBLISH', KEYS[3], ARGV[2])
return 1
"#;

// Range and delete run in one script so a session touched mid-sweep is never removed.
const PURGE_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[1])
for _, id in ipairs(ids) do
  redis.call('DEL', ARGV[2] .. id)
  redis.call('ZREM', KEYS[1], id)
  redis.call('PUBLISH', ARGV[2] .. id .. ':changes', 'deleted')
end
return ids
"#;

fn session_key(id: SessionId) -> String {
    format!("session:{}", id)
}

fn changes_channel(id: SessionId) -> String {
    format!("session:{}:changes", id)
}

#[derive(Clone)]
pub struct RedisSessionStore {
    client: redis::Client,
}

impl RedisSessionStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    fn parse_document(id: SessionId, fields: HashMap<String, String>) -> Result<Option<SessionDocument>, AppError> {
        if fields.is_empty() {
            return Ok(None);
        }
        let int_field = |name: &str| -> Result<i64, AppError> {
            fields
                .get(name)
                .map(|raw| raw.parse::<i64>())
                .transpose()
                .map_err(|e| AppError::NetworkUnavailable(format!("corrupt field {} on {}: {}", name, id, e)))
                .map(|v| v.unwrap_or_default())
        };

        Ok(Some(SessionDocument {
            session_id: id,
            created_at: int_field(FIELD_CREATED_AT)?,
            slot_count: int_field(FIELD_SLOT_COUNT)?.clamp(0, i64::from(u32::MAX)) as u32,
            state_blob: fields.get(FIELD_STATE_BLOB).cloned(),
            updated_at: int_field(FIELD_UPDATED_AT)?,
        }))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip_all, fields(session_id = %doc.session_id))]
    async fn create_session(&self, doc: &SessionDocument) -> Result<(), AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = session_key(doc.session_id);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(
                &key,
                &[
                    (FIELD_SLOT_COUNT, doc.slot_count.to_string()),
                    (FIELD_CREATED_AT, doc.created_at.to_string()),
                    (FIELD_UPDATED_AT, doc.updated_at.to_string()),
                ],
            )
            .ignore();
        if let Some(blob) = &doc.state_blob {
            pipe.hset(&key, FIELD_STATE_BLOB, blob).ignore();
        }
        pipe.zadd(UPDATED_INDEX, doc.session_id.to_string(), doc.updated_at)
            .ignore()
            .publish(changes_channel(doc.session_id), doc.updated_at)
            .ignore();

        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_session(&self, id: SessionId) -> Result<Option<SessionDocument>, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(session_key(id)).await?;
        Self::parse_document(id, fields)
    }

    #[instrument(skip(self))]
    async fn compare_and_set_slot_count(
        &self,
        id: SessionId,
        expected: u32,
        new: u32,
        now: i64,
    ) -> Result<bool, AppError> {
        // WATCH is per connection, so each attempt gets its own.
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = session_key(id);

        redis::cmd("WATCH").arg(&key).query_async::<()>(&mut conn).await?;
        let current: Option<u32> = conn.hget(&key, FIELD_SLOT_COUNT).await?;

        let current = match current {
            Some(count) => count,
            None => {
                redis::cmd("UNWATCH").query_async::<()>(&mut conn).await?;
                return Err(AppError::SessionNotFound(id));
            }
        };
        if current != expected {
            redis::cmd("UNWATCH").query_async::<()>(&mut conn).await?;
            return Ok(false);
        }

        // EXEC replies nil when the watched key moved underneath us.
        let committed: Option<(i64,)> = redis::pipe()
            .atomic()
            .hset_multiple(&key, &[(FIELD_SLOT_COUNT, new.to_string()), (FIELD_UPDATED_AT, now.to_string())])
            .ignore()
            .zadd(UPDATED_INDEX, id.to_string(), now)
            .ignore()
            .publish(changes_channel(id), now)
            .query_async(&mut conn)
            .await?;

        Ok(committed.is_some())
    }

    #[instrument(skip(self, blob))]
    async fn write_state(&self, id: SessionId, blob: String, now: i64) -> Result<(), AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let written: i64 = redis::Script::new(WRITE_STATE_SCRIPT)
            .key(session_key(id))
            .key(UPDATED_INDEX)
            .key(changes_channel(id))
            .arg(blob)
            .arg(now)
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;

        if written == 0 {
            return Err(AppError::SessionNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn watch_session(&self, id: SessionId) -> Result<SnapshotStream, AppError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(changes_channel(id)).await?;

        // Read after subscribing so no commit falls between the two.
        let initial = self.load_session(id).await?.ok_or(AppError::SessionNotFound(id))?;

        let store = self.clone();
        let updates = pubsub
            .into_on_message()
            .then(move |_msg| {
                let store = store.clone();
                async move { store.load_session(id).await }
            })
            // A deleted session ends the feed cleanly; a dropped pub/sub connection ends it with an error.
            .chain(futures::stream::once(futures::future::ready(Err(AppError::NetworkUnavailable(
                format!("change feed for {} disconnected", id),
            )))))
            .take_while(|loaded| futures::future::ready(!matches!(loaded, Ok(None))))
            .filter_map(|loaded| async move { loaded.transpose() });

        Ok(futures::stream::once(async move { Ok(initial) }).chain(updates).boxed())
    }

    #[instrument(skip(self))]
    async fn purge_before(&self, cutoff: i64) -> Result<Vec<SessionId>, AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: Vec<String> = redis::Script::new(PURGE_SCRIPT)
            .key(UPDATED_INDEX)
            .arg(cutoff)
            .arg("session:")
            .invoke_async(&mut conn)
            .await?;

        Ok(removed
            .iter()
            .filter_map(|raw| match raw.parse::<SessionId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(member = %raw, error = %e, "Skipping malformed retention index entry");
                    None
                }
            })
            .collect())
    }
}
