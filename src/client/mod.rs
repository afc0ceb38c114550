//! Connection and session layer: the websocket transport, the ref
//! allocator, the channel registry, heartbeats and reconnection.

mod builder;
mod connection;
mod core;
mod state;

pub use builder::{RealtimeClientBuilder, RealtimeClientOptions};
pub use connection::ConnectionState;
pub use core::{PushStatus, RealtimeClient};

pub(crate) use connection::ConnectionManager;
pub(crate) use state::ClientState;
