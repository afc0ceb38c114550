use crate::types::{RealtimeError, RealtimeMessage, Result};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Owns the transport handle and its background tasks.
///
/// Outbound frames are serialized here and handed to the writer task over
/// an unbounded channel, so sending never awaits; callers can push from
/// timer callbacks and binding callbacks alike.
pub struct ConnectionManager {
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<ConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(None),
            writer_task: Mutex::new(None),
            state: Mutex::new(ConnectionState::Closed),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, new_state: ConnectionState) {
        *self.state.lock().unwrap() = new_state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Install the writer side of a freshly opened transport.
    pub fn attach_writer(&self, writer: mpsc::UnboundedSender<Message>) {
        *self.writer.lock().unwrap() = Some(writer);
    }

    /// Track a background task tied to this connection's lifetime. Tracked
    /// tasks are aborted on [`close`](Self::close).
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().unwrap().push(handle);
    }

    /// Track the writer task. Unlike [`track`](Self::track)ed tasks it is
    /// never aborted: it exits on its own after draining the outbound queue,
    /// once the writer sender is dropped or a close frame goes through.
    pub fn track_writer(&self, handle: JoinHandle<()>) {
        *self.writer_task.lock().unwrap() = Some(handle);
    }

    /// Serialize and hand a frame to the writer task.
    pub fn send_message(&self, message: &RealtimeMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let writer = self.writer.lock().unwrap();
        match writer.as_ref() {
            Some(tx) => tx
                .send(Message::Text(json.into()))
                .map_err(|_| RealtimeError::NotConnected),
            None => Err(RealtimeError::NotConnected),
        }
    }

    /// Close the transport: queue a close frame, drop the writer handle and
    /// abort the connection's background tasks. The writer task is detached
    /// rather than aborted so the close frame reaches the wire.
    pub fn close(&self) {
        self.set_state(ConnectionState::Closing);
        if let Some(tx) = self.writer.lock().unwrap().take() {
            let _ = tx.send(Message::Close(None));
        }
        drop(self.writer_task.lock().unwrap().take());
        self.abort_tasks();
        self.set_state(ConnectionState::Closed);
    }

    /// Drop the writer without the close handshake (transport already gone).
    pub fn clear_writer(&self) {
        *self.writer.lock().unwrap() = None;
    }

    pub fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
