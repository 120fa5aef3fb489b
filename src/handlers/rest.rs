use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::instrument;

use crate::{
    data::{ClaimResponse, CreateSessionResponse, PurgeParams, SessionView},
    error::AppError,
    lifecycle::share_link,
    session::{now_millis, SessionId},
    state::SharedState,
};

// ==============================================================================
// === REST API Handlers
// =============================================================================

#[instrument(skip(state))]
pub async fn create_session_handler(
    State(state): State<SharedState>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), AppError> {
    let session_id = state.services.lifecycle.create_session().await?;
    let link = share_link(&state.config.session.public_origin, session_id);

    tracing::info!(session_id = %session_id, "Session created via HTTP");
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_id, link })))
}

#[instrument(skip(state))]
pub async fn get_session_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionView>, AppError> {
    let snapshot = state.services.channel.snapshot(session_id).await?;
    Ok(Json(SessionView::from_snapshot(&snapshot)))
}

#[instrument(skip(state))]
pub async fn claim_slot_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<ClaimResponse>, AppError> {
    let outcome = state.services.coordinator.claim_slot(session_id).await?;

    match outcome.slot() {
        Some(slot) => Ok(Json(ClaimResponse { assigned: true, final_count: outcome.final_count, slot: Some(slot) })),
        None => {
            // ALERT: third device trying to sit down
            tracing::warn!(session_id = %session_id, "Claim on a full session.");
            Err(AppError::SessionFull(session_id))
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn publish_state_handler(
    State(state): State<SharedState>,
    Path(session_id): Path<SessionId>,
    Json(payload): Json<Value>,
) -> Result<StatusCode, AppError> {
    state.services.channel.publish(session_id, &payload).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Cron entry point. Responds with `{ "<session_id>": null, ... }` for every deleted session.
#[instrument(skip_all)]
pub async fn purge_handler(
    State(state): State<SharedState>,
    Query(params): Query<PurgeParams>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let expected = state.config.maintenance.cron_key.as_bytes();
    let provided = params.key.unwrap_or_default();
    let matches: bool = provided.as_bytes().ct_eq(expected).into();

    if expected.is_empty() || !matches {
        tracing::warn!(
            "The key provided in the request does not match maintenance.cron_key. \
             Check the deployment configuration."
        );
        return Err(AppError::AuthMismatch);
    }

    let lifecycle = &state.services.lifecycle;
    let removed = lifecycle.purge_stale(lifecycle.retention_cutoff(now_millis())).await?;

    let body = removed.into_iter().map(|id| (id.to_string(), Value::Null)).collect();
    Ok(Json(body))
}
