use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::{
    channel::Subscription,
    data::{ClientMessage, ServerMessage, SessionView},
    session::SessionId,
    state::SharedState,
};

// ==============================================================================
// === Websocket Handlers
// =============================================================================

#[instrument(skip(ws, state))]
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<SessionId>,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    tracing::info!(session_id = %session_id, "WebSocket upgrade requested.");
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

/// Orchestrates the WebSocket lifecycle: Connect -> Subscribe -> Loop -> Disconnect
async fn handle_socket(mut socket: WebSocket, session_id: SessionId, state: SharedState) {
    tracing::info!(session_id = %session_id, "WebSocket connected.");

    let (sender_tx, mut sender_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Subscribe before splitting so a missing session can be reported and closed.
    let subscription = match subscribe_snapshots(&state, session_id, sender_tx.clone()).await {
        Some(subscription) => subscription,
        None => {
            if let Ok(text) = serde_json::to_string(&ServerMessage::Error { message: "Session not found".into() }) {
                let _ = socket.send(Message::Text(text.into())).await;
            }
            let _ = socket.close().await;
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Spawn Write Task (Store -> Client)
    let send_task = tokio::spawn(async move {
        while let Some(msg) = sender_rx.recv().await {
            let json_str = match serde_json::to_string(&msg) {
                Ok(json_str) => json_str,
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json_str.into())).await.is_err() {
                break;
            }
        }
    });

    // Read Loop (Client -> Store)
    while let Some(Ok(msg)) = ws_receiver.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => process_client_message(client_msg, session_id, &state, &sender_tx).await,
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Ignoring malformed client message");
                }
            }
        }
    }

    // Cleanup on Disconnect
    tracing::info!(session_id = %session_id, "WebSocket disconnected.");
    subscription.cancel();
    send_task.abort();
}

/// Forwards every snapshot of the session, decoded, to the socket's writer.
async fn subscribe_snapshots(
    state: &SharedState,
    session_id: SessionId,
    sender: mpsc::UnboundedSender<ServerMessage>,
) -> Option<Subscription> {
    let subscribed = state
        .services
        .channel
        .subscribe(session_id, move |snapshot| {
            let _ = sender.send(ServerMessage::Snapshot(SessionView::from_snapshot(&snapshot)));
        })
        .await;

    match subscribed {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Connection rejected: subscribe failed.");
            None
        }
    }
}

/// Route incoming messages to the state channel
async fn process_client_message(
    msg: ClientMessage,
    session_id: SessionId,
    state: &SharedState,
    sender: &mpsc::UnboundedSender<ServerMessage>,
) {
    tracing::debug!(session_id = %session_id, "Received message: {:?}", msg);
    match msg {
        ClientMessage::PublishState(payload) => {
            if let Err(e) = state.services.channel.publish(session_id, &payload).await {
                tracing::error!(session_id = %session_id, "Failed to publish state: {}", e);
                let _ = sender.send(ServerMessage::Error { message: e.notice() });
            }
        }
    }
}

#[cfg(test)]
mod ws_logic_tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SessionConfig;
    use crate::data::MemorySessionStore;
    use crate::state::{AppState, SessionServices};
    use serde_json::json;

    fn setup_test_state() -> SharedState {
        let store = Arc::new(MemorySessionStore::new());
        let mut config = crate::config::Config {
            server: crate::config::ServerConfig { addr: "0.0.0.0:0".to_string() },
            database: crate::config::DatabaseConfig { redis_url: "redis://mock".to_string() },
            logging: crate::config::LoggingConfig { level: "debug".to_string() },
            session: SessionConfig::default(),
            identity: crate::config::IdentityConfig { path: "identity.json".into() },
            maintenance: crate::config::MaintenanceConfig { cron_key: "key".to_string() },
        };
        config.session.claim_backoff_ms = 1;

        Arc::new(AppState {
            services: SessionServices::new(store, &config.session),
            config: Arc::new(config),
        })
    }

    #[tokio::test]
    async fn test_subscribe_missing_session_is_rejected() {
        let state = setup_test_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(subscribe_snapshots(&state, SessionId::new(), tx).await.is_none());
    }

    #[tokio::test]
    async fn test_publish_message_reaches_subscriber() {
        let state = setup_test_state();
        let session_id = state.services.lifecycle.create_session().await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = subscribe_snapshots(&state, session_id, tx.clone()).await.unwrap();

        match rx.recv().await.unwrap() {
            ServerMessage::Snapshot(view) => assert_eq!(view.state, None),
            other => panic!("expected initial snapshot, got {:?}", other),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"PUBLISH_STATE","payload":{"turn":1}}"#).unwrap();
        process_client_message(msg, session_id, &state, &tx).await;

        match rx.recv().await.unwrap() {
            ServerMessage::Snapshot(view) => assert_eq!(view.state, Some(json!({ "turn": 1 }))),
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_to_missing_session_reports_error() {
        let state = setup_test_state();
        let (tx, mut rx) = mpsc::unbounded_channel();

        process_client_message(ClientMessage::PublishState(json!({})), SessionId::new(), &state, &tx).await;

        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::Error { message: "This game no longer exists.".to_string() }
        );
    }
}
