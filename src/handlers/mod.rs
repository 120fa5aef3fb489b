pub mod rest;
pub mod ws;

pub use rest::{claim_slot_handler, create_session_handler, get_session_handler, publish_state_handler, purge_handler};
pub use ws::websocket_handler;
