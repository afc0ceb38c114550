use super::config::{BroadcastConfig, ChannelJoinConfig, JoinPayload, PresenceConfig};
use super::postgres_changes::{PostgresChangeData, PostgresChangePayload, PostgresChangesFilter};
use super::presence::{PresenceState, RawPresenceDiff, RawPresenceState};
use super::push::Push;
use super::state::{BindingCallback, ChannelState, ChannelStatus, EventBinding};
use crate::client::RealtimeClient;
use crate::infrastructure::Timer;
use crate::types::constants::{channel_events, phoenix_events};
use crate::types::{RealtimeError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Synthetic event name carrying the reply correlated to `ref` back
/// through the normal binding dispatch.
pub(crate) fn reply_event_name(r#ref: &str) -> String {
    format!("chan_reply_{}", r#ref)
}

/// Terminal states reported to the `subscribe` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeStatus {
    Subscribed,
    TimedOut,
    Closed,
    ChannelError,
}

impl SubscribeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribed => "SUBSCRIBED",
            Self::TimedOut => "TIMED_OUT",
            Self::Closed => "CLOSED",
            Self::ChannelError => "CHANNEL_ERROR",
        }
    }
}

impl std::fmt::Display for SubscribeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-channel options merged into the join payload `config`.
#[derive(Debug, Clone, Default)]
pub struct RealtimeChannelOptions {
    /// Receive this client's own broadcasts back
    pub broadcast_self: bool,
    /// Ask the server to acknowledge broadcasts
    pub broadcast_ack: bool,
    /// Presence grouping key; the server picks one when unset
    pub presence_key: Option<String>,
    /// Require authorization for the topic
    pub is_private: bool,
}

/// One multiplexed channel over the shared connection.
///
/// Holds its own join/leave state machine, its event bindings and its
/// rejoin timer. All mutation is synchronous under the state mutex; the
/// lock is never held across a callback or an await. Lock order, where
/// both are taken: channel state before push state.
pub struct RealtimeChannel {
    topic: String,
    socket: RealtimeClient,
    timeout: Duration,
    join_config: ChannelJoinConfig,
    rejoin_timer: Timer,
    state: Mutex<ChannelState>,
}

impl RealtimeChannel {
    pub(crate) fn new(
        topic: String,
        options: RealtimeChannelOptions,
        socket: RealtimeClient,
    ) -> Arc<Self> {
        let timeout = socket.default_timeout();
        let join_config = ChannelJoinConfig {
            broadcast: BroadcastConfig {
                self_: options.broadcast_self,
                ack: options.broadcast_ack,
            },
            presence: PresenceConfig {
                key: options.presence_key.unwrap_or_default(),
            },
            is_private: options.is_private,
            postgres_changes: Vec::new(),
        };

        let channel = Arc::new(Self {
            topic,
            socket,
            timeout,
            join_config: join_config.clone(),
            rejoin_timer: Timer::new(),
            state: Mutex::new(ChannelState::new()),
        });

        let payload = serde_json::to_value(JoinPayload {
            config: join_config,
            access_token: None,
        })
        .unwrap_or_default();
        let join_push = Push::new(
            Arc::downgrade(&channel),
            phoenix_events::JOIN,
            payload,
            timeout,
        );

        let weak = Arc::downgrade(&channel);
        join_push.receive("ok", move |_response| {
            if let Some(channel) = weak.upgrade() {
                channel.handle_join_ok();
            }
        });
        let weak = Arc::downgrade(&channel);
        join_push.receive("timeout", move |_response| {
            if let Some(channel) = weak.upgrade() {
                channel.handle_join_timeout();
            }
        });
        channel.state.lock().unwrap().join_push = Some(join_push);

        let weak = Arc::downgrade(&channel);
        channel.on_internal(phoenix_events::CLOSE, HashMap::new(), move |_payload, _ref| {
            if let Some(channel) = weak.upgrade() {
                channel.handle_close();
            }
        });
        let weak = Arc::downgrade(&channel);
        channel.on_internal(phoenix_events::ERROR, HashMap::new(), move |_payload, _ref| {
            if let Some(channel) = weak.upgrade() {
                channel.handle_error();
            }
        });
        let weak = Arc::downgrade(&channel);
        channel.on_internal(phoenix_events::REPLY, HashMap::new(), move |payload, r#ref| {
            if let (Some(channel), Some(r#ref)) = (weak.upgrade(), r#ref) {
                channel.trigger(&reply_event_name(&r#ref), payload, None);
            }
        });

        channel
    }

    /// Join the topic. The callback observes every terminal subscription
    /// state; postgres-change bindings registered beforehand are carried
    /// in the join payload and validated against the server's echo.
    ///
    /// A channel instance subscribes at most once.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F, timeout: Option<Duration>) -> Result<()>
    where
        F: Fn(SubscribeStatus, Option<String>) + Send + Sync + 'static,
    {
        if self.state.lock().unwrap().joined_once {
            return Err(RealtimeError::AlreadySubscribed);
        }
        let callback: Arc<dyn Fn(SubscribeStatus, Option<String>) + Send + Sync> =
            Arc::new(callback);
        let timeout = timeout.unwrap_or(self.timeout);

        let notify = Arc::clone(&callback);
        self.on_internal(phoenix_events::ERROR, HashMap::new(), move |payload, _ref| {
            let detail = (!payload.is_null()).then(|| payload.to_string());
            notify(SubscribeStatus::ChannelError, detail);
        });
        let notify = Arc::clone(&callback);
        self.on_internal(phoenix_events::CLOSE, HashMap::new(), move |_payload, _ref| {
            notify(SubscribeStatus::Closed, None);
        });

        let filters: Vec<HashMap<String, String>> = {
            let state = self.state.lock().unwrap();
            state
                .bindings
                .get(channel_events::POSTGRES_CHANGES)
                .map(|bindings| bindings.iter().map(|b| b.filter.clone()).collect())
                .unwrap_or_default()
        };

        let mut config = self.join_config.clone();
        config.postgres_changes = filters
            .iter()
            .map(|filter| serde_json::to_value(filter).unwrap_or_default())
            .collect();
        let payload = serde_json::to_value(JoinPayload {
            config,
            access_token: self.socket.access_token(),
        })
        .unwrap_or_default();

        let join_push = {
            let mut state = self.state.lock().unwrap();
            state.joined_once = true;
            state.join_push.clone()
        };
        let Some(join_push) = join_push else {
            return Ok(());
        };
        join_push.update_payload(payload);

        let weak = Arc::downgrade(self);
        let on_ok = Arc::clone(&callback);
        join_push.receive("ok", move |response| {
            let Some(channel) = weak.upgrade() else {
                return;
            };
            if let Some(token) = channel.socket.access_token() {
                channel.socket.set_auth(token);
            }
            channel.settle_subscription(&filters, &response, &on_ok);
        });
        let on_error = Arc::clone(&callback);
        join_push.receive("error", move |response| {
            let detail = (!response.is_null()).then(|| response.to_string());
            on_error(SubscribeStatus::ChannelError, detail);
        });
        let on_timeout = Arc::clone(&callback);
        join_push.receive("timeout", move |_response| {
            on_timeout(SubscribeStatus::TimedOut, None);
        });

        self.rejoin(timeout);
        Ok(())
    }

    /// Leave the topic and settle with a terminal status (`ok`, `timeout`
    /// or `error`). Safe while disconnected; the channel closes locally.
    pub async fn unsubscribe(self: &Arc<Self>) -> String {
        let mut rx = self.begin_unsubscribe();
        rx.recv().await.unwrap_or_else(|| "ok".to_string())
    }

    /// Register a callback for `event` frames. `filter` is opaque
    /// registration data; removal via [`off`](Self::off) compares it
    /// structurally.
    pub fn on<F>(&self, event: &str, filter: HashMap<String, String>, callback: F)
    where
        F: Fn(Value, Option<String>) + Send + Sync + 'static,
    {
        self.on_internal(event, filter, callback);
    }

    /// Register a typed callback for database changes matching `filter`.
    /// Must run before `subscribe`; the filter rides in the join payload.
    pub fn on_postgres_changes<F>(&self, filter: &PostgresChangesFilter, callback: F)
    where
        F: Fn(PostgresChangePayload) + Send + Sync + 'static,
    {
        self.on_internal(
            channel_events::POSTGRES_CHANGES,
            filter.to_hash_map(),
            move |payload, _ref| match serde_json::from_value(payload) {
                Ok(change) => callback(change),
                Err(error) => {
                    tracing::warn!(%error, "discarding malformed change payload")
                }
            },
        );
    }

    /// Register a callback for broadcast frames named `event`.
    pub fn on_broadcast<F>(&self, event: &str, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let mut filter = HashMap::new();
        filter.insert("event".to_string(), event.to_string());
        self.on_internal(channel_events::BROADCAST, filter, move |payload, _ref| {
            callback(payload)
        });
    }

    /// Remove every binding for `event` whose registration filter equals
    /// `filter`.
    pub fn off(&self, event: &str, filter: &HashMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        if let Some(bindings) = state.bindings.get_mut(&event.to_lowercase()) {
            bindings.retain(|binding| binding.filter != *filter);
        }
    }

    /// Push `event` with `payload` and await the terminal status: `ok`,
    /// `error`, `timeout` or `rate limited`. Broadcasts without the ack
    /// option settle `ok` as soon as they are handed to the transport.
    pub async fn push(
        self: &Arc<Self>,
        event: impl Into<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<String> {
        let event = event.into();
        let push = self.push_internal(&event, payload, timeout.unwrap_or(self.timeout))?;

        if push.rate_limited() {
            return Ok("rate limited".to_string());
        }
        if event == channel_events::BROADCAST && !self.join_config.broadcast.ack && push.sent() {
            return Ok("ok".to_string());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        for status in ["ok", "error", "timeout"] {
            let tx = tx.clone();
            push.receive(status, move |_response| {
                let _ = tx.send(status.to_string());
            });
        }
        drop(tx);
        Ok(rx.recv().await.unwrap_or_else(|| "error".to_string()))
    }

    /// Broadcast `event` to the topic's other subscribers.
    pub async fn send_broadcast(
        self: &Arc<Self>,
        event: impl Into<String>,
        payload: Value,
    ) -> Result<String> {
        let message = json!({
            "type": "broadcast",
            "event": event.into(),
            "payload": payload,
        });
        self.push(channel_events::BROADCAST, message, None).await
    }

    /// Announce this client's presence payload on the topic.
    pub async fn track(self: &Arc<Self>, payload: Value) -> Result<String> {
        let message = json!({
            "type": "presence",
            "event": "track",
            "payload": payload,
        });
        self.push(channel_events::PRESENCE, message, None).await
    }

    /// Withdraw this client's presence from the topic.
    pub async fn untrack(self: &Arc<Self>) -> Result<String> {
        let message = json!({"type": "presence", "event": "untrack"});
        self.push(channel_events::PRESENCE, message, None).await
    }

    /// Current synchronized presence state.
    pub fn presence_state(&self) -> PresenceState {
        self.state.lock().unwrap().presence.state().clone()
    }

    /// Shallow-merge `payload` into the join payload used by the next
    /// (re)join.
    pub fn update_join_payload(&self, payload: Value) {
        let join_push = self.state.lock().unwrap().join_push.clone();
        if let Some(push) = join_push {
            push.update_payload(payload);
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn status(&self) -> ChannelStatus {
        self.state.lock().unwrap().status
    }

    pub fn is_joined(&self) -> bool {
        self.status() == ChannelStatus::Joined
    }

    pub fn is_joining(&self) -> bool {
        self.status() == ChannelStatus::Joining
    }

    pub fn is_leaving(&self) -> bool {
        self.status() == ChannelStatus::Leaving
    }

    pub fn is_closed(&self) -> bool {
        self.status() == ChannelStatus::Closed
    }

    pub fn is_errored(&self) -> bool {
        self.status() == ChannelStatus::Errored
    }

    pub(crate) fn is_member(&self, topic: &str) -> bool {
        self.topic == topic
    }

    pub(crate) fn socket(&self) -> &RealtimeClient {
        &self.socket
    }

    /// The join push's correlation ref, doubling as this join's epoch.
    pub(crate) fn join_ref(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .join_push
            .as_ref()
            .and_then(|push| push.r#ref())
    }

    pub(crate) fn on_internal<F>(&self, event: &str, filter: HashMap<String, String>, callback: F)
    where
        F: Fn(Value, Option<String>) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        state
            .bindings
            .entry(event.to_lowercase())
            .or_default()
            .push(EventBinding {
                filter,
                id: None,
                callback: Arc::new(callback),
            });
    }

    /// Merge the new token into the join payload, and push it live if the
    /// channel is currently joined.
    pub(crate) fn refresh_access_token(self: &Arc<Self>, token: &str) {
        self.update_join_payload(json!({ "access_token": token }));
        let joined = {
            let state = self.state.lock().unwrap();
            state.joined_once && state.status == ChannelStatus::Joined
        };
        if joined {
            if let Err(error) = self.push_internal(
                channel_events::ACCESS_TOKEN,
                json!({ "access_token": token }),
                self.timeout,
            ) {
                tracing::warn!(%error, topic = %self.topic, "failed to push token refresh");
            }
        }
    }

    /// Start leaving and return the receiver the terminal status arrives
    /// on. Synchronous so it can run from callbacks and routing code.
    pub(crate) fn begin_unsubscribe(self: &Arc<Self>) -> mpsc::UnboundedReceiver<String> {
        let join_push = {
            let mut state = self.state.lock().unwrap();
            state.status = ChannelStatus::Leaving;
            state.join_push.clone()
        };
        // destroy re-enters the channel to unbind its reply event, so it
        // must run without the state lock held
        if let Some(join_push) = join_push {
            join_push.destroy();
        }
        self.rejoin_timer.reset();

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let leave_push = Push::new(
            Arc::downgrade(self),
            phoenix_events::LEAVE,
            json!({}),
            self.timeout,
        );

        for status in ["ok", "timeout"] {
            let weak = Arc::downgrade(self);
            let tx = tx.clone();
            leave_push.receive(status, move |_response| {
                if let Some(channel) = weak.upgrade() {
                    channel.on_leave_reply();
                }
                let _ = tx.send(status.to_string());
            });
        }
        let tx_error = tx;
        leave_push.receive("error", move |_response| {
            let _ = tx_error.send("error".to_string());
        });

        leave_push.send();
        if !self.can_push() {
            leave_push.trigger("ok", json!({}));
        }
        rx
    }

    /// Dispatch one event to the matching bindings.
    ///
    /// `insert`/`update`/`delete` shorthands route to `postgres_changes`
    /// bindings by their filter's event kind; lifecycle events carrying a
    /// ref from a previous join epoch are dropped; presence frames update
    /// the tracker before callbacks run; change frames are reshaped once
    /// into the typed payload form.
    pub(crate) fn trigger(self: &Arc<Self>, event: &str, payload: Value, r#ref: Option<String>) {
        let type_lc = event.to_lowercase();

        if phoenix_events::LIFECYCLE.contains(&type_lc.as_str()) {
            if r#ref.is_some() && r#ref != self.join_ref() {
                return;
            }
        }

        if matches!(type_lc.as_str(), "insert" | "update" | "delete") {
            let callbacks: Vec<BindingCallback> = {
                let state = self.state.lock().unwrap();
                state
                    .bindings
                    .get(channel_events::POSTGRES_CHANGES)
                    .map(|bindings| {
                        bindings
                            .iter()
                            .filter(|binding| {
                                binding.filter.get("event").is_some_and(|bound| {
                                    bound == "*" || bound.to_lowercase() == type_lc
                                })
                            })
                            .map(|binding| Arc::clone(&binding.callback))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            for callback in callbacks {
                callback(payload.clone(), r#ref.clone());
            }
            return;
        }

        if type_lc == channel_events::PRESENCE_STATE {
            if let Ok(raw) = serde_json::from_value::<RawPresenceState>(payload.clone()) {
                self.state.lock().unwrap().presence.sync_state(raw);
            }
        } else if type_lc == channel_events::PRESENCE_DIFF {
            if let Ok(diff) = serde_json::from_value::<RawPresenceDiff>(payload.clone()) {
                self.state.lock().unwrap().presence.sync_diff(diff);
            }
        }

        let relayed = matches!(
            type_lc.as_str(),
            channel_events::BROADCAST | channel_events::PRESENCE | channel_events::POSTGRES_CHANGES
        );

        let callbacks: Vec<BindingCallback> = {
            let state = self.state.lock().unwrap();
            let Some(bindings) = state.bindings.get(&type_lc) else {
                return;
            };
            if relayed {
                let ids: Vec<u64> = payload
                    .get("ids")
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(Value::as_u64).collect())
                    .unwrap_or_default();
                let payload_event = payload
                    .get("data")
                    .and_then(|data| data.get("type"))
                    .and_then(Value::as_str)
                    .or_else(|| payload.get("event").and_then(Value::as_str))
                    .unwrap_or("")
                    .to_lowercase();

                bindings
                    .iter()
                    .filter(|binding| {
                        let bound = binding.filter.get("event");
                        match binding.id {
                            Some(id) => {
                                ids.contains(&id)
                                    && bound.is_some_and(|bound| {
                                        bound == "*" || bound.to_lowercase() == payload_event
                                    })
                            }
                            None => bound.is_some_and(|bound| {
                                bound == "*" || bound.to_lowercase() == payload_event
                            }),
                        }
                    })
                    .map(|binding| Arc::clone(&binding.callback))
                    .collect()
            } else {
                bindings
                    .iter()
                    .map(|binding| Arc::clone(&binding.callback))
                    .collect()
            }
        };
        if callbacks.is_empty() {
            return;
        }

        let dispatch_payload = if payload.get("ids").is_some() {
            payload
                .get("data")
                .cloned()
                .and_then(|data| serde_json::from_value::<PostgresChangeData>(data).ok())
                .and_then(|data| serde_json::to_value(PostgresChangePayload::from_data(data)).ok())
                .unwrap_or(payload)
        } else {
            payload
        };

        for callback in callbacks {
            callback(dispatch_payload.clone(), r#ref.clone());
        }
    }

    fn can_push(&self) -> bool {
        self.socket.is_connected() && self.is_joined()
    }

    /// Build a push for `event`, transmitting immediately when possible
    /// and buffering until the join completes otherwise.
    fn push_internal(
        self: &Arc<Self>,
        event: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Arc<Push>> {
        if !self.state.lock().unwrap().joined_once {
            return Err(RealtimeError::NotJoined {
                event: event.to_string(),
                topic: self.topic.clone(),
            });
        }

        let push = Push::new(Arc::downgrade(self), event, payload, timeout);
        if self.can_push() {
            push.send();
        } else {
            push.start_timeout();
            self.state.lock().unwrap().push_buffer.push(Arc::clone(&push));
        }
        Ok(push)
    }

    /// Validate the server's echoed change filters against ours, order for
    /// order, adopting the server-assigned ids on success.
    fn settle_subscription(
        self: &Arc<Self>,
        client_filters: &[HashMap<String, String>],
        response: &Value,
        callback: &Arc<dyn Fn(SubscribeStatus, Option<String>) + Send + Sync>,
    ) {
        if client_filters.is_empty() {
            callback(SubscribeStatus::Subscribed, None);
            return;
        }

        let server_filters = response
            .get("postgres_changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut ids: Vec<Option<u64>> = Vec::with_capacity(client_filters.len());
        let matched = client_filters.len() <= server_filters.len()
            && client_filters
                .iter()
                .zip(&server_filters)
                .all(|(client, server)| {
                    if filters_match(client, server) {
                        ids.push(server.get("id").and_then(Value::as_u64));
                        true
                    } else {
                        false
                    }
                });

        if !matched {
            tracing::error!(topic = %self.topic, "server rejected the change filters");
            drop(self.begin_unsubscribe());
            callback(
                SubscribeStatus::ChannelError,
                Some(
                    "mismatch between server and client bindings for postgres changes".to_string(),
                ),
            );
            return;
        }

        {
            let mut state = self.state.lock().unwrap();
            if let Some(bindings) = state.bindings.get_mut(channel_events::POSTGRES_CHANGES) {
                for (binding, id) in bindings.iter_mut().zip(ids) {
                    binding.id = id;
                }
            }
        }
        callback(SubscribeStatus::Subscribed, None);
    }

    fn handle_join_ok(&self) {
        tracing::debug!(topic = %self.topic, "joined");
        let buffered = {
            let mut state = self.state.lock().unwrap();
            state.status = ChannelStatus::Joined;
            std::mem::take(&mut state.push_buffer)
        };
        self.rejoin_timer.reset();
        for push in buffered {
            push.send();
        }
    }

    fn handle_join_timeout(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.status != ChannelStatus::Joining {
                return;
            }
            state.status = ChannelStatus::Errored;
        }
        tracing::warn!(topic = %self.topic, "join timed out");
        self.schedule_rejoin();
    }

    fn handle_error(self: &Arc<Self>) {
        if self.is_leaving() || self.is_closed() {
            return;
        }
        tracing::warn!(topic = %self.topic, "channel errored");
        self.state.lock().unwrap().status = ChannelStatus::Errored;
        self.schedule_rejoin();
    }

    fn handle_close(self: &Arc<Self>) {
        tracing::debug!(topic = %self.topic, "channel closed");
        self.rejoin_timer.reset();
        self.state.lock().unwrap().status = ChannelStatus::Closed;
        self.socket.forget_channel(self);
    }

    fn on_leave_reply(self: &Arc<Self>) {
        self.trigger(phoenix_events::CLOSE, json!("leave"), self.join_ref());
    }

    /// (Re)send the join push, first evicting any other channel still
    /// holding this topic server-side.
    fn rejoin(self: &Arc<Self>, timeout: Duration) {
        if self.is_leaving() {
            return;
        }
        self.socket.leave_open_topic(&self.topic);
        let join_push = {
            let mut state = self.state.lock().unwrap();
            state.status = ChannelStatus::Joining;
            state.join_push.clone()
        };
        if let Some(join_push) = join_push {
            join_push.resend(timeout);
        }
    }

    /// Keep the rejoin timer armed until the socket is connected, then
    /// rejoin. Backoff position carries across firings.
    fn rejoin_until_connected(self: &Arc<Self>) {
        self.schedule_rejoin();
        if self.socket.is_connected() {
            self.rejoin(self.timeout);
        }
    }

    fn schedule_rejoin(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let socket = self.socket.clone();
        self.rejoin_timer.schedule(
            move || {
                if let Some(channel) = weak.upgrade() {
                    channel.rejoin_until_connected();
                }
            },
            move |tries| socket.reconnect_after(tries),
        );
    }
}

fn filters_match(client: &HashMap<String, String>, server: &Value) -> bool {
    ["event", "schema", "table", "filter"].iter().all(|key| {
        client.get(*key).map(String::as_str) == server.get(*key).and_then(Value::as_str)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ConnectionState, PushStatus, RealtimeClientOptions};
    use crate::channel::PostgresChangeEvent;
    use crate::types::RealtimeMessage;
    use tokio_tungstenite::tungstenite::Message;

    fn setup() -> (
        RealtimeClient,
        Arc<RealtimeChannel>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        let client = RealtimeClient::new(
            "ws://localhost:4000/socket",
            RealtimeClientOptions::default(),
        )
        .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        client.connection().attach_writer(tx);
        client.connection().set_state(ConnectionState::Open);

        let channel = RealtimeChannel::new(
            "realtime:room:1".to_string(),
            RealtimeChannelOptions::default(),
            client.clone(),
        );
        client.register_channel(Arc::clone(&channel));
        (client, channel, rx)
    }

    fn next_frame(rx: &mut mpsc::UnboundedReceiver<Message>) -> RealtimeMessage {
        match rx.try_recv().unwrap() {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn reply(client: &RealtimeClient, frame: &RealtimeMessage, status: &str, response: Value) {
        client.ingest(
            RealtimeMessage::new(
                frame.topic.clone(),
                phoenix_events::REPLY.into(),
                json!({"status": status, "response": response}),
            )
            .with_ref(frame.r#ref.clone().unwrap()),
        );
    }

    fn statuses() -> (
        Arc<Mutex<Vec<String>>>,
        impl Fn(SubscribeStatus, Option<String>) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |status: SubscribeStatus, _err: Option<String>| {
            sink.lock().unwrap().push(status.to_string());
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_channel_starts_closed_with_merged_join_config() {
        let client = RealtimeClient::new(
            "ws://localhost:4000/socket",
            RealtimeClientOptions::default(),
        )
        .unwrap();
        let channel = RealtimeChannel::new(
            "realtime:room:1".to_string(),
            RealtimeChannelOptions {
                broadcast_ack: true,
                presence_key: Some("user-1".to_string()),
                ..Default::default()
            },
            client.clone(),
        );

        assert!(channel.is_closed());
        let state = channel.state.lock().unwrap();
        assert!(!state.joined_once);
        assert!(state.push_buffer.is_empty());

        let join_push = state.join_push.as_ref().unwrap();
        assert_eq!(join_push.event(), phoenix_events::JOIN);
        assert_eq!(join_push.timeout(), client.default_timeout());
        assert_eq!(
            join_push.payload()["config"],
            json!({
                "broadcast": {"self": false, "ack": true},
                "presence": {"key": "user-1"},
                "private": false
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn every_matching_reply_hook_fires() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        let push = channel
            .push_internal("counter", json!({"n": 1}), channel.timeout)
            .unwrap();
        let hits = Arc::new(Mutex::new(Vec::new()));
        for tag in ["h1", "h2"] {
            let sink = Arc::clone(&hits);
            push.receive("ok", move |_response| {
                sink.lock().unwrap().push(tag);
            });
        }

        let frame = next_frame(&mut rx);
        reply(&client, &frame, "ok", json!({}));
        assert_eq!(*hits.lock().unwrap(), vec!["h1", "h2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_sends_join_and_settles_on_reply() {
        let (client, channel, mut rx) = setup();
        let (seen, callback) = statuses();

        channel.subscribe(callback, None).unwrap();
        assert!(channel.is_joining());

        let join = next_frame(&mut rx);
        assert_eq!(join.topic, "realtime:room:1");
        assert_eq!(join.event.as_str(), phoenix_events::JOIN);
        assert_eq!(join.r#ref, join.join_ref);
        assert_eq!(join.payload["config"]["broadcast"]["ack"], json!(false));

        reply(&client, &join, "ok", json!({}));
        assert!(channel.is_joined());
        assert_eq!(*seen.lock().unwrap(), vec!["SUBSCRIBED".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_twice_is_rejected_without_a_frame() {
        let (_client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let _join = next_frame(&mut rx);

        let result = channel.subscribe(|_status, _err| {}, None);
        assert!(matches!(result, Err(RealtimeError::AlreadySubscribed)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn push_before_subscribe_is_rejected() {
        let (_client, channel, _rx) = setup();
        let result = channel.push("counter", json!({"n": 1}), None).await;
        assert!(matches!(result, Err(RealtimeError::NotJoined { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_while_joining_flush_in_order_after_join() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);

        // Buffered: the channel is still joining.
        let first = channel.push_internal("counter", json!({"n": 1}), channel.timeout).unwrap();
        let second = channel.push_internal("counter", json!({"n": 2}), channel.timeout).unwrap();
        assert!(!first.sent() && !second.sent());
        assert!(rx.try_recv().is_err());

        reply(&client, &join, "ok", json!({}));
        assert_eq!(next_frame(&mut rx).payload["n"], json!(1));
        let frame = next_frame(&mut rx);
        assert_eq!(frame.payload["n"], json!(2));
        assert_eq!(frame.join_ref, join.r#ref);
    }

    #[tokio::test(start_paused = true)]
    async fn change_filters_ride_the_join_and_adopt_server_ids() {
        let (client, channel, mut rx) = setup();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        channel.on_postgres_changes(
            &PostgresChangesFilter::new(PostgresChangeEvent::Insert, "public").table("messages"),
            move |change| {
                sink.lock().unwrap().push(change);
            },
        );

        let (seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        let filters = join.payload["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0]["event"], json!("INSERT"));

        reply(
            &client,
            &join,
            "ok",
            json!({"postgres_changes": [
                {"id": 7, "event": "INSERT", "schema": "public", "table": "messages"}
            ]}),
        );
        assert_eq!(*seen.lock().unwrap(), vec!["SUBSCRIBED".to_string()]);

        client.ingest(RealtimeMessage::new(
            "realtime:room:1".to_string(),
            channel_events::POSTGRES_CHANGES.into(),
            json!({
                "ids": [7],
                "data": {
                    "type": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "commit_timestamp": "2025-11-27T16:16:54Z",
                    "errors": null,
                    "columns": [
                        {"name": "id", "type": "int8"},
                        {"name": "active", "type": "bool"}
                    ],
                    "record": {"id": 47, "active": "t"}
                }
            }),
        ));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].change_type, "INSERT");
        assert_eq!(received[0].new["active"], json!(true));
        assert_eq!(received[0].new["id"], json!(47));
    }

    #[tokio::test(start_paused = true)]
    async fn change_frames_with_foreign_ids_are_not_delivered() {
        let (client, channel, mut rx) = setup();
        let hits = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&hits);
        channel.on_postgres_changes(
            &PostgresChangesFilter::new(PostgresChangeEvent::All, "public"),
            move |_change| {
                *sink.lock().unwrap() += 1;
            },
        );
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(
            &client,
            &join,
            "ok",
            json!({"postgres_changes": [{"id": 3, "event": "*", "schema": "public"}]}),
        );

        client.ingest(RealtimeMessage::new(
            "realtime:room:1".to_string(),
            channel_events::POSTGRES_CHANGES.into(),
            json!({
                "ids": [99],
                "data": {
                    "type": "DELETE",
                    "schema": "public",
                    "table": "messages",
                    "commit_timestamp": "2025-11-27T16:16:54Z",
                    "errors": null,
                    "columns": [],
                    "old_record": {}
                }
            }),
        ));
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn filter_mismatch_fails_the_subscription() {
        let (client, channel, mut rx) = setup();
        channel.on_postgres_changes(
            &PostgresChangesFilter::new(PostgresChangeEvent::Insert, "public").table("messages"),
            |_change| {},
        );
        let (seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);

        reply(
            &client,
            &join,
            "ok",
            json!({"postgres_changes": [
                {"id": 7, "event": "UPDATE", "schema": "public", "table": "messages"}
            ]}),
        );
        // Unsubscribing from a mismatch closes the channel locally before
        // the error is reported.
        assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("CHANNEL_ERROR"));
        assert!(channel.is_closed());
        assert!(client.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn join_timeout_reports_and_schedules_rejoin() {
        let (_client, channel, mut rx) = setup();
        let (seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let _join = next_frame(&mut rx);

        // Default join timeout is 10s; no reply arrives.
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert!(seen.lock().unwrap().contains(&"TIMED_OUT".to_string()));
        assert!(channel.is_errored());

        // First backoff step is 1s: the rejoin fires and re-sends the join.
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let rejoin = next_frame(&mut rx);
        assert_eq!(rejoin.event.as_str(), phoenix_events::JOIN);
        assert!(channel.is_joining());
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_without_ack_settles_immediately() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        let status = channel.send_broadcast("cursor", json!({"x": 4})).await.unwrap();
        assert_eq!(status, "ok");

        let frame = next_frame(&mut rx);
        assert_eq!(frame.event.as_str(), channel_events::BROADCAST);
        assert_eq!(frame.payload["event"], json!("cursor"));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_broadcasts_hit_the_throttle() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        let first = channel.send_broadcast("a", json!({})).await.unwrap();
        let second = channel.send_broadcast("b", json!({})).await.unwrap();
        assert_eq!(first, "ok");
        assert_eq!(second, "rate limited");

        // Protocol events are exempt even inside the window.
        let status = client.push(
            RealtimeMessage::new(
                "realtime:room:1".to_string(),
                phoenix_events::LEAVE.into(),
                json!({}),
            )
            .with_ref("x"),
        );
        assert_eq!(status, PushStatus::Sent);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_push_times_out_without_reply() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        let status = channel
            .push("counter", json!({"n": 1}), Some(Duration::from_millis(200)))
            .await
            .unwrap();
        assert_eq!(status, "timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_binding_matches_by_event_name() {
        let (client, channel, mut rx) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.on_broadcast("cursor", move |payload| {
            sink.lock().unwrap().push(payload);
        });
        let (_statuses, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        client.ingest(RealtimeMessage::new(
            "realtime:room:1".to_string(),
            channel_events::BROADCAST.into(),
            json!({"event": "cursor", "payload": {"x": 1}}),
        ));
        client.ingest(RealtimeMessage::new(
            "realtime:room:1".to_string(),
            channel_events::BROADCAST.into(),
            json!({"event": "other", "payload": {"x": 2}}),
        ));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["payload"]["x"], json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn off_removes_bindings_by_structural_filter_equality() {
        let (client, channel, mut rx) = setup();
        let hits = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&hits);
        channel.on_broadcast("cursor", move |_payload| {
            *sink.lock().unwrap() += 1;
        });
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        let mut filter = HashMap::new();
        filter.insert("event".to_string(), "cursor".to_string());
        channel.off(channel_events::BROADCAST, &filter);

        client.ingest(RealtimeMessage::new(
            "realtime:room:1".to_string(),
            channel_events::BROADCAST.into(),
            json!({"event": "cursor", "payload": {}}),
        ));
        assert_eq!(*hits.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lifecycle_frames_from_a_previous_join_are_dropped() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));
        assert!(channel.is_joined());

        client.ingest(
            RealtimeMessage::new(
                "realtime:room:1".to_string(),
                phoenix_events::CLOSE.into(),
                json!({}),
            )
            .with_ref("999"),
        );
        assert!(channel.is_joined());

        client.ingest(
            RealtimeMessage::new(
                "realtime:room:1".to_string(),
                phoenix_events::CLOSE.into(),
                json!({}),
            )
            .with_ref(join.r#ref.clone().unwrap()),
        );
        assert!(channel.is_closed());
        assert!(client.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_while_disconnected_settles_ok() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        client.connection().set_state(ConnectionState::Closed);
        let status = channel.unsubscribe().await;
        assert_eq!(status, "ok");
        assert!(channel.is_closed());
        assert!(client.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn token_refresh_updates_join_payload_and_pushes_live() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        client.set_auth("jwt-refresh");

        let frame = next_frame(&mut rx);
        assert_eq!(frame.event.as_str(), channel_events::ACCESS_TOKEN);
        assert_eq!(frame.payload["access_token"], json!("jwt-refresh"));

        let join_payload = {
            let state = channel.state.lock().unwrap();
            state.join_push.as_ref().unwrap().payload()
        };
        assert_eq!(join_payload["access_token"], json!("jwt-refresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn presence_frames_update_the_tracker() {
        let (client, channel, mut rx) = setup();
        let (_seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        client.ingest(RealtimeMessage::new(
            "realtime:room:1".to_string(),
            channel_events::PRESENCE_STATE.into(),
            json!({"u1": {"metas": [{"phx_ref": "r1", "name": "ana"}]}}),
        ));
        assert_eq!(channel.presence_state()["u1"][0].presence_ref, "r1");

        client.ingest(RealtimeMessage::new(
            "realtime:room:1".to_string(),
            channel_events::PRESENCE_DIFF.into(),
            json!({
                "joins": {"u2": {"metas": [{"phx_ref": "r2"}]}},
                "leaves": {"u1": {"metas": [{"phx_ref": "r1"}]}}
            }),
        ));
        let state = channel.presence_state();
        assert!(!state.contains_key("u1"));
        assert_eq!(state["u2"][0].presence_ref, "r2");
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_errors_joined_channels() {
        let (client, channel, mut rx) = setup();
        let (seen, callback) = statuses();
        channel.subscribe(callback, None).unwrap();
        let join = next_frame(&mut rx);
        reply(&client, &join, "ok", json!({}));

        channel.trigger(phoenix_events::ERROR, Value::Null, None);
        assert!(channel.is_errored());
        assert!(seen.lock().unwrap().contains(&"CHANNEL_ERROR".to_string()));
    }
}
