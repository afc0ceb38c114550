use crate::channel::RealtimeChannel;
use crate::types::RealtimeMessage;
use std::sync::Arc;

pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&RealtimeMessage) + Send + Sync>;

/// Session state owned by the client, behind one mutex.
///
/// Everything here is mutated only with the lock held and never across an
/// await point, which is what keeps the single-writer discipline: inbound
/// frames, timer firings and outbound calls all observe a consistent
/// snapshot.
pub struct ClientState {
    /// Source of all correlation refs; wraps to 0 on overflow
    pub ref_counter: u64,

    /// Outstanding heartbeat ref, if a probe is unanswered
    pub pending_heartbeat_ref: Option<String>,

    /// Registered channels, in creation order
    pub channels: Vec<Arc<RealtimeChannel>>,

    /// Frames deferred while disconnected, drained FIFO exactly once on open
    pub send_buffer: Vec<RealtimeMessage>,

    /// Bearer credential propagated to join payloads and live channels
    pub access_token: Option<String>,

    /// Inside the rate-limit cooldown window
    pub in_throttle: bool,

    pub open_callbacks: Vec<OpenCallback>,
    pub close_callbacks: Vec<CloseCallback>,
    pub error_callbacks: Vec<ErrorCallback>,
    pub message_callbacks: Vec<MessageCallback>,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            ref_counter: 0,
            pending_heartbeat_ref: None,
            channels: Vec::new(),
            send_buffer: Vec::new(),
            access_token: None,
            in_throttle: false,
            open_callbacks: Vec::new(),
            close_callbacks: Vec::new(),
            error_callbacks: Vec::new(),
            message_callbacks: Vec::new(),
        }
    }

    /// Allocate the next correlation ref. Unique among in-flight refs;
    /// wraps back to 0 when the counter saturates.
    pub fn make_ref(&mut self) -> String {
        self.ref_counter = self.ref_counter.checked_add(1).unwrap_or(0);
        self.ref_counter.to_string()
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
