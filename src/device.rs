//! One participant's side of a session, wired to the embedded game component by two
//! message ports: [`DeviceEvent`]s flow out to the component, [`DeviceCommand`]s flow in.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::channel::{decode_snapshot_state, Subscription};
use crate::error::AppError;
use crate::identity::IdentityStore;
use crate::lifecycle::{inspect_session_link, share_link, SessionLink};
use crate::session::{SessionId, Slot, MAX_SLOTS};
use crate::state::SessionServices;

/// Core -> game component.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    SessionCreated { session_id: SessionId, link: String },
    SlotAssigned(Slot),
    OpponentJoined,
    StateChanged(Value),
    Notice(String),
    LinkReady(String),
}

/// Game component -> core.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    PublishState(Value),
    Alert(String),
    CreateSession,
    CopyLink,
}

pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;

/// A session this device has a seat in, with its live change feed.
#[derive(Debug)]
pub struct JoinedSession {
    pub session_id: SessionId,
    pub slot: Slot,
    subscription: Subscription,
}

impl JoinedSession {
    pub fn leave(self) {
        self.subscription.cancel();
    }
}

pub struct Device {
    services: SessionServices,
    identity: Arc<dyn IdentityStore>,
    origin: String,
    events: EventSender,
}

impl Device {
    pub fn new(services: SessionServices, identity: Arc<dyn IdentityStore>, origin: impl Into<String>, events: EventSender) -> Self {
        Self { services, identity, origin: origin.into(), events }
    }

    fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Game component is gone, dropping event");
        }
    }

    fn report(&self, error: &AppError) {
        tracing::warn!(error = %error, "Surfacing error to player");
        self.emit(DeviceEvent::Notice(error.notice()));
    }

    /// Page-load flow: join the session named in `url`, or create one when there is none.
    #[instrument(skip(self))]
    pub async fn open(&self, url: &str) -> Result<JoinedSession, AppError> {
        let session_id = match inspect_session_link(url) {
            SessionLink::Found(id) => id,
            SessionLink::Absent => self.create().await?,
            SessionLink::Malformed(raw) => {
                self.emit(DeviceEvent::Notice(format!(
                    "The game link is not valid ({}). Starting a new game instead.",
                    raw
                )));
                self.create().await?
            }
        };
        self.join(session_id).await
    }

    async fn create(&self) -> Result<SessionId, AppError> {
        let session_id = self.services.lifecycle.create_session().await?;
        let link = share_link(&self.origin, session_id);
        self.emit(DeviceEvent::SessionCreated { session_id, link });
        Ok(session_id)
    }

    /// Takes a seat in `session_id`, reusing the locally recorded slot when there is one.
    #[instrument(skip(self))]
    pub async fn join(&self, session_id: SessionId) -> Result<JoinedSession, AppError> {
        let slot = match self.identity.slot_for(session_id).await? {
            Some(slot) => {
                tracing::info!(session_id = %session_id, slot = %slot, "Rejoining with recorded slot");
                slot
            }
            None => {
                let outcome = self.services.coordinator.claim_slot(session_id).await?;
                let claimed = outcome.slot().ok_or(AppError::SessionFull(session_id))?;
                self.identity.record(session_id, claimed).await?
            }
        };
        self.emit(DeviceEvent::SlotAssigned(slot));

        let events = self.events.clone();
        let closed_events = self.events.clone();
        let mut opponent_announced = false;
        let mut last_blob: Option<String> = None;
        let subscription = self
            .services
            .channel
            .subscribe_until_closed(
                session_id,
                move |snapshot| {
                    if snapshot.slot_count >= MAX_SLOTS && !opponent_announced {
                        opponent_announced = true;
                        let _ = events.send(DeviceEvent::OpponentJoined);
                    }
                    if snapshot.state_blob.is_none() || snapshot.state_blob == last_blob {
                        return;
                    }
                    if let Some(state) = decode_snapshot_state(&snapshot) {
                        let _ = events.send(DeviceEvent::StateChanged(state));
                    }
                    last_blob = snapshot.state_blob;
                },
                move |failure| {
                    let notice = match failure {
                        Some(e) => e.notice(),
                        None => AppError::SessionNotFound(session_id).notice(),
                    };
                    let _ = closed_events.send(DeviceEvent::Notice(notice));
                },
            )
            .await?;

        Ok(JoinedSession { session_id, slot, subscription })
    }

    /// Serves the game component until its command port closes.
    ///
    /// Errors never end the loop; they become [`DeviceEvent::Notice`]s.
    pub async fn run(self, url: &str, mut commands: mpsc::UnboundedReceiver<DeviceCommand>) {
        let mut joined = match self.open(url).await {
            Ok(joined) => Some(joined),
            Err(e) => {
                self.report(&e);
                None
            }
        };

        while let Some(command) = commands.recv().await {
            match command {
                DeviceCommand::PublishState(state) => match &joined {
                    Some(session) => {
                        if let Err(e) = self.services.channel.publish(session.session_id, &state).await {
                            self.report(&e);
                        }
                    }
                    None => self.emit(DeviceEvent::Notice("Join a game before making a move.".to_string())),
                },
                DeviceCommand::Alert(message) => self.emit(DeviceEvent::Notice(message)),
                DeviceCommand::CreateSession => {
                    let created = match self.create().await {
                        Ok(session_id) => self.join(session_id).await,
                        Err(e) => Err(e),
                    };
                    match created {
                        Ok(session) => {
                            if let Some(previous) = joined.replace(session) {
                                previous.leave();
                            }
                        }
                        Err(e) => self.report(&e),
                    }
                }
                DeviceCommand::CopyLink => match &joined {
                    Some(session) => self.emit(DeviceEvent::LinkReady(share_link(&self.origin, session.session_id))),
                    None => self.emit(DeviceEvent::Notice("There is no game to share yet.".to_string())),
                },
            }
        }

        if let Some(session) = joined {
            tracing::debug!(session_id = %session.session_id, "Command port closed, leaving session");
            session.leave();
        }
    }
}
