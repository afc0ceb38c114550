use super::builder::{RealtimeClientBuilder, RealtimeClientOptions};
use super::connection::{ConnectionManager, ConnectionState};
use super::state::{ClientState, CloseCallback, ErrorCallback, MessageCallback, OpenCallback};
use crate::channel::{RealtimeChannel, RealtimeChannelOptions};
use crate::infrastructure::Timer;
use crate::messaging::MessageRouter;
use crate::types::constants::{
    channel_events, phoenix_events, PHOENIX_TOPIC, RECONNECT_INTERVALS, TRANSPORT_WEBSOCKET, VSN,
};
use crate::types::{RealtimeError, RealtimeMessage, Result};
use crate::websocket::WebSocketFactory;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Outcome of handing a frame to [`RealtimeClient::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Serialized and handed to the writer task
    Sent,
    /// Deferred to the send buffer until the next open
    Buffered,
    /// Dropped by the outbound throttle
    RateLimited,
}

/// Multiplexed realtime connection: one websocket, many channels.
///
/// Cheap to clone; clones share the connection, the session state and the
/// timers. All protocol mutation happens synchronously under the state
/// mutexes, so channel callbacks and timer firings never race an await.
#[derive(Clone)]
pub struct RealtimeClient {
    pub(crate) endpoint: String,
    pub(crate) options: Arc<RealtimeClientOptions>,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) state: Arc<Mutex<ClientState>>,
    pub(crate) heartbeat_timer: Timer,
    pub(crate) reconnect_timer: Timer,
}

impl RealtimeClient {
    /// Build a client for `endpoint` (a `ws://` or `wss://` URL without the
    /// trailing `/websocket` segment).
    pub fn new(endpoint: impl Into<String>, options: RealtimeClientOptions) -> Result<Self> {
        Ok(RealtimeClientBuilder::new(endpoint, options)?.build())
    }

    /// Open the websocket and start the reader/writer tasks. Idempotent
    /// while a connection is opening or open.
    pub async fn connect(&self) -> Result<()> {
        match self.connection.state() {
            ConnectionState::Connecting | ConnectionState::Open => return Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
        self.connection.set_state(ConnectionState::Connecting);

        let url = match self.endpoint_url() {
            Ok(url) => url,
            Err(error) => {
                self.connection.set_state(ConnectionState::Closed);
                return Err(error);
            }
        };

        tracing::info!(url = %url, "connecting");
        let stream = match WebSocketFactory::create(&url).await {
            Ok(stream) => stream,
            Err(error) => {
                self.connection.set_state(ConnectionState::Closed);
                self.on_conn_error(&error.to_string());
                return Err(error);
            }
        };

        let (mut sink, mut reader) = stream.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if sink.send(frame).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let client = self.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RealtimeMessage>(text.as_str()) {
                            Ok(message) => client.ingest(message),
                            Err(error) => {
                                tracing::warn!(%error, "discarding undecodable frame")
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "server closed the connection");
                        client.handle_transport_close("server closed");
                        break;
                    }
                    Some(Ok(other)) => {
                        tracing::trace!(?other, "ignoring non-text frame");
                    }
                    Some(Err(error)) => {
                        let reason = error.to_string();
                        client.on_conn_error(&reason);
                        client.handle_transport_close(&reason);
                        break;
                    }
                    None => {
                        client.handle_transport_close("transport stream ended");
                        break;
                    }
                }
            }
        });

        self.connection.track_writer(writer_task);
        self.connection.track(reader_task);
        self.connection.attach_writer(writer_tx);
        self.connection.set_state(ConnectionState::Open);
        self.on_conn_open();
        Ok(())
    }

    /// Close the connection and stop reconnecting. Channels keep their
    /// bindings; a later `connect` rejoins them through their own timers.
    pub fn disconnect(&self) {
        if self.connection.state() == ConnectionState::Closed {
            return;
        }
        tracing::info!("disconnecting");
        self.teardown();
        self.reconnect_timer.reset();
    }

    /// Create and register a channel on `realtime:{topic}`, connecting
    /// first if needed. Channels on the same topic are distinct instances.
    pub async fn channel(
        &self,
        topic: impl Into<String>,
        options: RealtimeChannelOptions,
    ) -> Arc<RealtimeChannel> {
        if !self.is_connected() {
            if let Err(error) = self.connect().await {
                tracing::error!(%error, "implicit connect failed");
            }
        }

        let topic = format!("realtime:{}", topic.into());
        let channel = RealtimeChannel::new(topic, options, self.clone());
        self.register_channel(Arc::clone(&channel));
        channel
    }

    pub(crate) fn register_channel(&self, channel: Arc<RealtimeChannel>) {
        self.state.lock().unwrap().channels.push(channel);
    }

    /// Currently registered channels.
    pub fn channels(&self) -> Vec<Arc<RealtimeChannel>> {
        self.state.lock().unwrap().channels.clone()
    }

    /// Unsubscribe `channel` and drop the connection if it was the last
    /// one. Returns the terminal leave status.
    pub async fn remove_channel(&self, channel: Arc<RealtimeChannel>) -> String {
        let status = channel.unsubscribe().await;
        if self.state.lock().unwrap().channels.is_empty() {
            self.disconnect();
        }
        status
    }

    /// Unsubscribe every channel, then disconnect.
    pub async fn remove_all_channels(&self) {
        let channels = self.channels();
        for channel in channels {
            channel.unsubscribe().await;
        }
        self.disconnect();
    }

    /// Transmit a frame, defer it while disconnected, or drop it if its
    /// event class is inside the throttle window.
    pub(crate) fn push(&self, message: RealtimeMessage) -> PushStatus {
        tracing::debug!(
            topic = %message.topic,
            event = %message.event,
            r#ref = message.r#ref.as_deref().unwrap_or(""),
            "push"
        );

        if !self.connection.is_connected() {
            self.state.lock().unwrap().send_buffer.push(message);
            return PushStatus::Buffered;
        }

        let throttled_class = channel_events::RATE_LIMITED.contains(&message.event.as_str());
        if throttled_class {
            let window = self.options.throttle_window();
            {
                let mut state = self.state.lock().unwrap();
                if state.in_throttle {
                    tracing::warn!(event = %message.event, "push dropped by throttle");
                    return PushStatus::RateLimited;
                }
                state.in_throttle = true;
            }
            let shared = Arc::clone(&self.state);
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                shared.lock().unwrap().in_throttle = false;
            });
        }

        if self.connection.send_message(&message).is_err() {
            self.state.lock().unwrap().send_buffer.push(message);
            return PushStatus::Buffered;
        }
        PushStatus::Sent
    }

    /// Store a new access token and propagate it: merged into every join
    /// payload, and pushed live to channels that are currently joined.
    pub fn set_auth(&self, token: impl Into<String>) {
        let token = token.into();
        let channels = {
            let mut state = self.state.lock().unwrap();
            state.access_token = Some(token.clone());
            state.channels.clone()
        };
        for channel in channels {
            channel.refresh_access_token(&token);
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.lock().unwrap().access_token.clone()
    }

    /// Register a callback for connection open.
    pub fn on_open(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.state
            .lock()
            .unwrap()
            .open_callbacks
            .push(Arc::new(callback) as OpenCallback);
    }

    /// Register a callback for connection close; receives the reason.
    pub fn on_close(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.state
            .lock()
            .unwrap()
            .close_callbacks
            .push(Arc::new(callback) as CloseCallback);
    }

    /// Register a callback for transport errors; receives the description.
    pub fn on_error(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.state
            .lock()
            .unwrap()
            .error_callbacks
            .push(Arc::new(callback) as ErrorCallback);
    }

    /// Register a callback observing every decoded inbound frame.
    pub fn on_message(&self, callback: impl Fn(&RealtimeMessage) + Send + Sync + 'static) {
        self.state
            .lock()
            .unwrap()
            .message_callbacks
            .push(Arc::new(callback) as MessageCallback);
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn default_timeout(&self) -> Duration {
        self.options.timeout
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Allocate the next correlation ref.
    pub(crate) fn make_ref(&self) -> String {
        self.state.lock().unwrap().make_ref()
    }

    /// Backoff delay for reconnect attempt `tries` (1-based), clamped to
    /// the last table entry.
    pub(crate) fn reconnect_after(&self, tries: u32) -> Duration {
        let index = (tries as usize)
            .saturating_sub(1)
            .min(RECONNECT_INTERVALS.len() - 1);
        Duration::from_millis(RECONNECT_INTERVALS[index])
    }

    /// Unsubscribe whichever other channel currently holds `topic` joined
    /// or joining. At most one channel per topic is ever server-side
    /// joined.
    pub(crate) fn leave_open_topic(&self, topic: &str) {
        let open = self
            .state
            .lock()
            .unwrap()
            .channels
            .iter()
            .find(|channel| {
                channel.is_member(topic) && (channel.is_joined() || channel.is_joining())
            })
            .cloned();
        if let Some(channel) = open {
            tracing::info!(topic, "leaving duplicate topic");
            channel.begin_unsubscribe();
        }
    }

    /// Drop `channel` from the registry (called when it closes).
    pub(crate) fn forget_channel(&self, channel: &Arc<RealtimeChannel>) {
        self.state
            .lock()
            .unwrap()
            .channels
            .retain(|registered| !Arc::ptr_eq(registered, channel));
    }

    /// Route one decoded inbound frame to its channels and observers.
    pub(crate) fn ingest(&self, message: RealtimeMessage) {
        MessageRouter::new(Arc::clone(&self.state)).route(message);
    }

    pub(crate) fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Liveness probe. Two unanswered probes in a row count as a dead
    /// connection and trigger the reconnect path.
    pub(crate) fn send_heartbeat(&self) {
        if !self.connection.is_connected() {
            return;
        }

        let r#ref = {
            let mut state = self.state.lock().unwrap();
            if state.pending_heartbeat_ref.take().is_some() {
                None
            } else {
                let r#ref = state.make_ref();
                state.pending_heartbeat_ref = Some(r#ref.clone());
                Some(r#ref)
            }
        };

        let Some(r#ref) = r#ref else {
            tracing::warn!("heartbeat timeout; closing connection");
            self.teardown();
            self.on_conn_close("heartbeat timeout");
            return;
        };

        let message = RealtimeMessage::new(
            PHOENIX_TOPIC.to_string(),
            phoenix_events::HEARTBEAT.into(),
            json!({}),
        )
        .with_ref(r#ref);
        if let Err(error) = self.connection.send_message(&message) {
            tracing::warn!(%error, "failed to send heartbeat");
        }

        // Refresh the token alongside each probe so long-lived channels
        // never outlive their credential.
        if let Some(token) = self.access_token() {
            self.set_auth(token);
        }
    }

    /// Close the transport and stop the heartbeat without touching the
    /// reconnect timer, so a reconnect loop keeps its backoff position.
    pub(crate) fn teardown(&self) {
        self.connection.close();
        self.heartbeat_timer.reset();
        self.state.lock().unwrap().pending_heartbeat_ref = None;
    }

    fn on_conn_open(&self) {
        tracing::info!("connected");

        let buffered = {
            let mut state = self.state.lock().unwrap();
            std::mem::take(&mut state.send_buffer)
        };
        for message in buffered {
            if let Err(error) = self.connection.send_message(&message) {
                tracing::warn!(%error, topic = %message.topic, "failed to flush buffered frame");
            }
        }

        self.reconnect_timer.reset();
        self.heartbeat_timer.reset();
        let client = self.clone();
        let interval = self.options.heartbeat_interval;
        self.heartbeat_timer
            .interval(move || client.send_heartbeat(), move || interval);

        let callbacks = self.state.lock().unwrap().open_callbacks.clone();
        for callback in callbacks {
            callback();
        }
    }

    fn on_conn_close(&self, reason: &str) {
        tracing::info!(reason, "connection closed");

        let channels = self.channels();
        for channel in channels {
            channel.trigger(phoenix_events::ERROR, Value::Null, None);
        }

        self.heartbeat_timer.reset();
        let client = self.clone();
        let backoff_client = self.clone();
        self.reconnect_timer.schedule(
            move || {
                client.teardown();
                tokio::spawn(async move {
                    if let Err(error) = client.connect().await {
                        client.on_conn_close(&error.to_string());
                    }
                });
            },
            move |tries| backoff_client.reconnect_after(tries),
        );

        let callbacks = self.state.lock().unwrap().close_callbacks.clone();
        for callback in callbacks {
            callback(reason);
        }
    }

    fn on_conn_error(&self, reason: &str) {
        tracing::error!(reason, "connection error");
        let callbacks = self.state.lock().unwrap().error_callbacks.clone();
        for callback in callbacks {
            callback(reason);
        }
    }

    /// The transport went away underneath us (close frame, read error or
    /// stream end): mark closed and enter the reconnect path.
    fn handle_transport_close(&self, reason: &str) {
        self.connection.set_state(ConnectionState::Closed);
        self.connection.clear_writer();
        self.on_conn_close(reason);
    }

    /// Full websocket URL: endpoint + `/websocket`, with params, protocol
    /// version and header pairs as query parameters.
    fn endpoint_url(&self) -> Result<Url> {
        let base = self.endpoint.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{TRANSPORT_WEBSOCKET}"))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RealtimeError::Configuration(format!(
                    "endpoint scheme must be ws or wss, got '{other}'"
                )))
            }
        }

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.options.params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("vsn", VSN);
            for (key, value) in self.options.merged_headers() {
                pairs.append_pair(&key, &value);
            }
        }
        Ok(url)
    }
}
