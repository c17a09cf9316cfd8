//! The relay core: connection registry, presence, message delivery,
//! read-state, and typing relay, plus the wire envelopes, the dispatcher,
//! and the WebSocket server that tie them to the transport.

pub mod delivery;
pub mod dispatcher;
pub mod events;
pub mod presence;
pub mod registry;
pub mod seen;
pub mod server;
pub mod typing;
