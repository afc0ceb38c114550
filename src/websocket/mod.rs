//! WebSocket transport creation.

mod factory;

pub use factory::{WebSocketFactory, WsStream};
