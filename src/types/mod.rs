pub mod constants;
pub mod error;
pub mod message;

pub use constants::{DEFAULT_TIMEOUT, HEARTBEAT_INTERVAL, PHOENIX_TOPIC, VSN};
pub use error::{RealtimeError, Result};
pub use message::RealtimeMessage;
