pub mod channel;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod device;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod lifecycle;
pub mod session;
pub mod state;

use axum::{
    http::Method,
    routing::{get, post, put},
    Router,
};
use crate::config::Config;
use handlers::{rest, ws};
use state::{AppState, SessionServices, SharedState};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::data::{RedisSessionStore, SessionStore};
use crate::error::AppError;

/// Builds the gateway against the Redis store named in `config`.
pub fn create_app(config: Config) -> Result<Router, AppError> {
    let client = redis::Client::open(config.database.redis_url.clone())?;
    let store: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(client));
    Ok(create_app_with_store(config, store))
}

pub fn create_app_with_store(config: Config, store: Arc<dyn SessionStore>) -> Router {
    let state = Arc::new(AppState {
        services: SessionServices::new(store, &config.session),
        config: Arc::new(config),
    });
    router(state)
}

fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sessions", post(rest::create_session_handler))
        .route("/sessions/{id}", get(rest::get_session_handler))
        .route("/sessions/{id}/claim", post(rest::claim_slot_handler))
        .route("/sessions/{id}/state", put(rest::publish_state_handler))
        .route("/ws/sessions/{id}", get(ws::websocket_handler))
        .route("/maintenance/purge", get(rest::purge_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)))
        .layer(cors)
}
