//! Wire events and inbound frame routing.

pub mod event;
mod router;

pub use event::{ChannelEvent, SystemEvent};
pub(crate) use router::MessageRouter;
