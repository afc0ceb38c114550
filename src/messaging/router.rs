use crate::client::ClientState;
use crate::types::RealtimeMessage;
use std::sync::{Arc, Mutex};

/// Routes one decoded inbound frame to every channel on its topic and to
/// the registered message observers.
///
/// The session lock is held only to settle the heartbeat ref and snapshot
/// the recipients; dispatch itself runs lock-free so channel callbacks may
/// re-enter the client.
pub struct MessageRouter {
    state: Arc<Mutex<ClientState>>,
}

impl MessageRouter {
    pub fn new(state: Arc<Mutex<ClientState>>) -> Self {
        Self { state }
    }

    pub fn route(&self, message: RealtimeMessage) {
        tracing::trace!(
            topic = %message.topic,
            event = %message.event,
            r#ref = message.r#ref.as_deref().unwrap_or(""),
            "inbound frame"
        );

        let (channels, callbacks) = {
            let mut state = self.state.lock().unwrap();
            if state.pending_heartbeat_ref.is_some() {
                let heartbeat_reply = state.pending_heartbeat_ref == message.r#ref;
                // A frame whose event matches its payload's declared type is
                // live server traffic and settles the heartbeat like a reply.
                let live_traffic = message.payload.get("type").and_then(|t| t.as_str())
                    == Some(message.event.as_str());
                if heartbeat_reply || live_traffic {
                    state.pending_heartbeat_ref = None;
                }
            }
            let channels: Vec<_> = state
                .channels
                .iter()
                .filter(|channel| channel.is_member(&message.topic))
                .cloned()
                .collect();
            (channels, state.message_callbacks.clone())
        };

        for channel in channels {
            channel.trigger(
                message.event.as_str(),
                message.payload.clone(),
                message.r#ref.clone(),
            );
        }
        for callback in callbacks {
            callback(&message);
        }
    }
}
