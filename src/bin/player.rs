//! Terminal stand-in for the embedded game component.
//!
//! `player [URL]` joins the session in URL (or creates one). Each stdin line is a command:
//! `/new`, `/link`, `/say <text>`, or a JSON value to publish as the new game state.

use pair_session::{
    config::Config,
    data::{RedisSessionStore, SessionStore},
    device::{Device, DeviceCommand, DeviceEvent},
    identity::{FileIdentityStore, IdentityStore},
    state::SessionServices,
};
use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_command(line: &str) -> Option<DeviceCommand> {
    let line = line.trim();
    match line {
        "" => None,
        "/new" => Some(DeviceCommand::CreateSession),
        "/link" => Some(DeviceCommand::CopyLink),
        _ => {
            if let Some(text) = line.strip_prefix("/say ") {
                return Some(DeviceCommand::Alert(text.to_string()));
            }
            match serde_json::from_str(line) {
                Ok(state) => Some(DeviceCommand::PublishState(state)),
                Err(e) => {
                    eprintln!("not a command or JSON state: {}", e);
                    None
                }
            }
        }
    }
}

fn render(event: DeviceEvent) {
    match event {
        DeviceEvent::SessionCreated { session_id, link } => println!("created {} - send this link: {}", session_id, link),
        DeviceEvent::SlotAssigned(slot) => println!("you are {}", slot),
        DeviceEvent::OpponentJoined => println!("both seats taken, game on"),
        DeviceEvent::StateChanged(state) => println!("state: {}", state),
        DeviceEvent::Notice(text) => println!("! {}", text),
        DeviceEvent::LinkReady(link) => println!("link: {}", link),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.logging.level.clone().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let url = env::args().nth(1).unwrap_or_else(|| format!("{}/", config.session.public_origin));

    let client = redis::Client::open(config.database.redis_url.clone())?;
    let store: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(client));
    let identity: Arc<dyn IdentityStore> = Arc::new(FileIdentityStore::new(config.identity.path.clone()));
    let services = SessionServices::new(store, &config.session);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let device = Device::new(services, identity, config.session.public_origin.clone(), events_tx);

    let device_task = tokio::spawn(async move { device.run(&url, commands_rx).await });
    let render_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            render(event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(command) = parse_command(&line) {
            if commands_tx.send(command).is_err() {
                break;
            }
        }
    }

    drop(commands_tx);
    device_task.await?;
    render_task.await?;
    Ok(())
}
