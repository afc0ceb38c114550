use super::presence::Presence;
use super::push::Push;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Channel join/leave lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Closed,
    Errored,
    Joined,
    Joining,
    Leaving,
}

/// Callback invoked when a bound event is dispatched: receives the
/// (possibly reshaped) payload and the frame's correlation ref.
pub type BindingCallback = Arc<dyn Fn(Value, Option<String>) + Send + Sync>;

/// One registered event listener. `filter` is opaque registration data
/// compared structurally on removal; `id` is the server-assigned
/// postgres-changes filter id, set once the join reply confirms it.
pub struct EventBinding {
    pub filter: HashMap<String, String>,
    pub id: Option<u64>,
    pub callback: BindingCallback,
}

impl std::fmt::Debug for EventBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBinding")
            .field("filter", &self.filter)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Mutable state for a channel, guarded by one mutex on the owning
/// `RealtimeChannel`. Bindings are keyed by lower-cased event type;
/// insertion order within a key is the dispatch order.
pub struct ChannelState {
    pub status: ChannelStatus,
    pub joined_once: bool,
    pub bindings: HashMap<String, Vec<EventBinding>>,
    pub push_buffer: Vec<Arc<Push>>,
    pub join_push: Option<Arc<Push>>,
    pub presence: Presence,
}

impl ChannelState {
    pub fn new() -> Self {
        Self {
            status: ChannelStatus::Closed,
            joined_once: false,
            bindings: HashMap::new(),
            push_buffer: Vec::new(),
            join_push: None,
            presence: Presence::default(),
        }
    }
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::new()
    }
}
