use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Upper bound on `slot_count`; a session has exactly two seats.
pub const MAX_SLOTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)] // Serialize directly as the inner UUID string
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    #[serde(rename = "Slot A")]
    A,
    #[serde(rename = "Slot B")]
    B,
}

impl Slot {
    /// Maps a committed slot counter onto the seat it grants.
    pub fn from_committed_count(count: u32) -> Option<Self> {
        match count {
            1 => Some(Slot::A),
            2 => Some(Slot::B),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Slot::A => "Slot A",
            Slot::B => "Slot B",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The shared record both devices read and write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session_id: SessionId,
    pub created_at: i64,
    pub slot_count: u32,
    pub state_blob: Option<String>,
    pub updated_at: i64,
}

impl SessionDocument {
    pub fn new(session_id: SessionId, now: i64) -> Self {
        Self {
            session_id,
            created_at: now,
            slot_count: 0,
            state_blob: None,
            updated_at: now,
        }
    }

    pub fn is_full(&self) -> bool {
        self.slot_count >= MAX_SLOTS
    }
}

/// Full document value handed to change listeners. Never a diff.
pub type SessionSnapshot = SessionDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub assigned: bool,
    pub final_count: u32,
}

impl ClaimOutcome {
    pub fn slot(&self) -> Option<Slot> {
        if self.assigned {
            Slot::from_committed_count(self.final_count)
        } else {
            None
        }
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
