use futures::{SinkExt, StreamExt};
use pair_session::data::{ClaimResponse, ClientMessage, CreateSessionResponse};
use pair_session::session::SessionId;
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

async fn spawn_session_connection(
    session_id: SessionId,
    name: String,
    opening_move: Option<serde_json::Value>,
) -> Result<tokio::task::JoinHandle<()>, Box<dyn std::error::Error>> {
    let ws_base = "ws://127.0.0.1:3000/ws/sessions";

    let handle = tokio::spawn(async move {
        let url_str = format!("{}/{}", ws_base, session_id);
        let (ws_stream, _) = connect_async(url_str).await.expect("failed to connect");
        let (mut write, mut read) = ws_stream.split();

        println!("....[{name}] Connected!");

        if let Some(state) = opening_move {
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            println!("....[{name}] Publishing opening state...");
            let msg = serde_json::to_string(&ClientMessage::PublishState(state)).unwrap();
            write
                .send(Message::Text(msg.into()))
                .await
                .expect("failed to publish state");
        }

        while let Some(msg) = read.next().await {
            let msg = msg.expect("Error reading message");
            if msg.is_text() {
                println!("....[{name} RX] {}", msg.to_text().unwrap());
            }
        }
    });

    Ok(handle)
}

async fn claim(client: &reqwest::Client, base_url: &str, session_id: SessionId) -> Result<ClaimResponse, Box<dyn std::error::Error>> {
    Ok(client
        .post(format!("{}/sessions/{}/claim", base_url, session_id))
        .send()
        .await?
        .error_for_status()?
        .json::<ClaimResponse>()
        .await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let base_url = "http://127.0.0.1:3000";

    println!("--- PAIR SESSION TEST CLIENT ---");

    println!("\n[1] Creating Session...");
    let created = client
        .post(format!("{}/sessions", base_url))
        .send()
        .await?
        .json::<CreateSessionResponse>()
        .await?;

    let session_id = created.session_id;
    println!("Success! Session ID: {}", session_id);
    println!("Share link: {}", created.link);

    println!("\n[2] Claiming Slots...");
    let host = claim(&client, base_url, session_id).await?;
    let guest = claim(&client, base_url, session_id).await?;
    println!("Host:  {:?}", host.slot);
    println!("Guest: {:?}", guest.slot);

    let third = client
        .post(format!("{}/sessions/{}/claim", base_url, session_id))
        .send()
        .await?;
    println!("Third claim answered {}", third.status());

    println!("\n[3] Connecting WebSockets...");
    let host_handle =
        spawn_session_connection(session_id, "Host".to_string(), Some(json!({ "turn": 1 }))).await?;
    let guest_handle = spawn_session_connection(session_id, "Guest".to_string(), None).await?;

    let _ = tokio::join!(host_handle, guest_handle);

    Ok(())
}
