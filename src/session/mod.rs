pub mod codec;
pub mod types;

pub use codec::CodecError;
pub use types::{now_millis, ClaimOutcome, SessionDocument, SessionId, SessionSnapshot, Slot, MAX_SLOTS};
