use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use crate::session::{CodecError, SessionId};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unreadable state blob: {0}")]
    Decode(#[from] CodecError),

    #[error("Session {0} changed while claiming a slot")]
    ClaimConflict(SessionId),

    #[error("Session {0} already has two players")]
    SessionFull(SessionId),

    #[error("Store unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Maintenance key does not match")]
    AuthMismatch,

    #[error("Session with ID {0} not found")]
    SessionNotFound(SessionId),
}

impl AppError {
    /// Text suitable for showing to a player.
    pub fn notice(&self) -> String {
        match self {
            AppError::SessionFull(_) => "This game already has two players.".to_string(),
            AppError::SessionNotFound(_) => "This game no longer exists.".to_string(),
            AppError::Decode(_) => "The game state could not be read.".to_string(),
            AppError::Redis(_) | AppError::Io(_) | AppError::NetworkUnavailable(_) => {
                "Connection problem, please check your network and reload.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Redis(e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "The session store is unavailable".to_string())
            }
            AppError::Serde(e) => {
                tracing::error!("Serialization error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal serialization error occurred".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("I/O error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "An internal I/O error occurred".to_string())
            }
            AppError::Decode(e) => {
                tracing::warn!("Decode error: {}", e);
                (StatusCode::UNPROCESSABLE_ENTITY, format!("Unreadable game state: {}", e))
            }
            AppError::ClaimConflict(id) => {
                (StatusCode::CONFLICT, format!("Session {} changed concurrently, retry", id))
            }
            AppError::SessionFull(id) => {
                (StatusCode::CONFLICT, format!("Session {} is full", id))
            }
            AppError::NetworkUnavailable(reason) => {
                tracing::error!("Store unavailable: {}", reason);
                (StatusCode::SERVICE_UNAVAILABLE, "The session store is unavailable".to_string())
            }
            AppError::AuthMismatch => (
                StatusCode::FORBIDDEN,
                "Security key does not match. Make sure your \"key\" URL query parameter matches the \
                 maintenance.cron_key setting."
                    .to_string(),
            ),
            AppError::SessionNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Session with id {} not found", id))
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
