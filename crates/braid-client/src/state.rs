use braid_protocol::OutboundEvent;

/// Connection lifecycle a [`crate::ClientSession`] moves through. Mirrors
/// spec §4.11's named states exactly; nothing here is teacher-derived since
/// the teacher's `ChannelManager` never exposes its connect loop as an
/// observable state machine to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Events a [`crate::ClientSession`] emits on its event bus. The session
/// itself never blocks a caller waiting on a reply; everything arrives
/// here, matching spec §9's "typed event bus per session" redesign flag.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    Frame(OutboundEvent),
}
