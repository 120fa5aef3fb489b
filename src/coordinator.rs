use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::config::SessionConfig;
use crate::data::SessionStore;
use crate::error::AppError;
use crate::session::{now_millis, ClaimOutcome, SessionId, MAX_SLOTS};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl From<&SessionConfig> for RetryPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_attempts: config.claim_max_attempts.max(1),
            backoff: Duration::from_millis(config.claim_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Hands out the two seats of a session with compare-and-increment on `slot_count`.
#[derive(Clone)]
pub struct SlotCoordinator {
    store: Arc<dyn SessionStore>,
    policy: RetryPolicy,
}

impl SlotCoordinator {
    pub fn new(store: Arc<dyn SessionStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Claims the next free slot.
    ///
    /// The committed count is the assignment: 1 is Slot A, 2 is Slot B. A full session
    /// yields `assigned: false` without writing anything. Running out of attempts
    /// surfaces as [`AppError::NetworkUnavailable`].
    #[instrument(skip(self))]
    pub async fn claim_slot(&self, session_id: SessionId) -> Result<ClaimOutcome, AppError> {
        for attempt in 1..=self.policy.max_attempts {
            match self.try_claim(session_id).await {
                Ok(outcome) => {
                    if outcome.assigned {
                        tracing::info!(session_id = %session_id, attempt, count = outcome.final_count, "Slot claimed");
                    } else {
                        tracing::info!(session_id = %session_id, "Claim rejected, session full");
                    }
                    return Ok(outcome);
                }
                Err(AppError::ClaimConflict(_)) => {
                    tracing::debug!(session_id = %session_id, attempt, "Lost slot race, retrying");
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.backoff_for(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(session_id = %session_id, attempts = self.policy.max_attempts, "Gave up claiming a slot");
        Err(AppError::NetworkUnavailable(format!(
            "could not claim a slot in session {} after {} attempts",
            session_id, self.policy.max_attempts
        )))
    }

    async fn try_claim(&self, session_id: SessionId) -> Result<ClaimOutcome, AppError> {
        let doc = self
            .store
            .load_session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound(session_id))?;

        if doc.slot_count >= MAX_SLOTS {
            return Ok(ClaimOutcome { assigned: false, final_count: doc.slot_count });
        }

        let next = doc.slot_count + 1;
        if self
            .store
            .compare_and_set_slot_count(session_id, doc.slot_count, next, now_millis())
            .await?
        {
            Ok(ClaimOutcome { assigned: true, final_count: next })
        } else {
            Err(AppError::ClaimConflict(session_id))
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff * attempt;
        let jitter_ms = rand::rng().random_range(0..=self.policy.backoff.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}
