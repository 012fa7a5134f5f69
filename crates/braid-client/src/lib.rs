//! Edge library implementing the client half of a braidchat session
//! (spec §4.11): a single `ClientSession` owns one WebSocket connection,
//! reconnecting with backoff, buffering frames while offline, and
//! surfacing everything through a typed event bus rather than callbacks.

mod backoff;
mod session;
mod state;

pub use session::ClientSession;
pub use state::{ClientEvent, ConnectionState};
