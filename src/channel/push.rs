use super::core::{reply_event_name, RealtimeChannel};
use crate::client::PushStatus;
use crate::infrastructure::Timer;
use crate::types::RealtimeMessage;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Hook invoked with the reply `response` when the matching status settles.
pub type ReplyCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// One outbound message awaiting a correlated reply.
///
/// The correlation ref is allocated lazily on the first send attempt; the
/// owning channel temporarily binds the synthetic `chan_reply_<ref>` event
/// so the reply reaches this push without push-specific routing in the
/// channel. A push settles once, to `ok`, `error` or `timeout`; `resend`
/// resets the lifecycle in place for retry.
pub struct Push {
    channel: Weak<RealtimeChannel>,
    event: String,
    timeout_timer: Timer,
    inner: Mutex<PushInner>,
}

struct PushInner {
    payload: Value,
    timeout: Duration,
    r#ref: Option<String>,
    ref_event: Option<String>,
    received: Option<String>,
    hooks: Vec<(String, ReplyCallback)>,
    sent: bool,
    rate_limited: bool,
    timeout_started: bool,
}

impl Push {
    pub fn new(
        channel: Weak<RealtimeChannel>,
        event: impl Into<String>,
        payload: Value,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            event: event.into(),
            timeout_timer: Timer::new(),
            inner: Mutex::new(PushInner {
                payload,
                timeout,
                r#ref: None,
                ref_event: None,
                received: None,
                hooks: Vec::new(),
                sent: false,
                rate_limited: false,
                timeout_started: false,
            }),
        })
    }

    /// Register a hook for a terminal status. Chainable; every hook whose
    /// status matches the eventual reply fires, not just the first.
    pub fn receive<F>(self: &Arc<Self>, status: &str, callback: F) -> Arc<Self>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if !self.has_received("timeout") {
            self.inner
                .lock()
                .unwrap()
                .hooks
                .push((status.to_string(), Arc::new(callback)));
        }
        Arc::clone(self)
    }

    /// Start the timeout clock and transmit. No-op once resolved to
    /// `timeout` (until reset via [`resend`](Self::resend)).
    pub fn send(self: &Arc<Self>) {
        if self.has_received("timeout") {
            return;
        }
        self.start_timeout();

        let Some(channel) = self.channel.upgrade() else {
            return;
        };

        let (payload, r#ref) = {
            let mut inner = self.inner.lock().unwrap();
            inner.sent = true;
            (inner.payload.clone(), inner.r#ref.clone())
        };

        let mut message = RealtimeMessage::new(
            channel.topic().to_string(),
            self.event.as_str().into(),
            payload,
        );
        message.r#ref = r#ref;
        message.join_ref = channel.join_ref();

        let status = channel.socket().push(message);
        if status == PushStatus::RateLimited {
            self.inner.lock().unwrap().rate_limited = true;
        }
    }

    /// Reset ref/result/sent state and send again, with a fresh timeout.
    pub fn resend(self: &Arc<Self>, timeout: Duration) {
        self.cancel_ref_event();
        self.timeout_timer.reset();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.timeout = timeout;
            inner.r#ref = None;
            inner.ref_event = None;
            inner.received = None;
            inner.sent = false;
            inner.rate_limited = false;
            inner.timeout_started = false;
        }
        self.send();
    }

    /// Shallow-merge `payload` over the current payload (top-level keys).
    pub fn update_payload(&self, payload: Value) {
        let mut inner = self.inner.lock().unwrap();
        match (&mut inner.payload, payload) {
            (Value::Object(current), Value::Object(update)) => {
                for (key, value) in update {
                    current.insert(key, value);
                }
            }
            (current, update) => *current = update,
        }
    }

    /// Allocate the ref, bind the synthetic reply event and arm the
    /// timeout timer. Idempotent until the push is reset.
    pub fn start_timeout(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.timeout_started {
                return;
            }
            inner.timeout_started = true;
        }

        let Some(channel) = self.channel.upgrade() else {
            return;
        };

        let r#ref = channel.socket().make_ref();
        let ref_event = reply_event_name(&r#ref);
        let timeout = {
            let mut inner = self.inner.lock().unwrap();
            inner.r#ref = Some(r#ref);
            inner.ref_event = Some(ref_event.clone());
            inner.timeout
        };

        let weak = Arc::downgrade(self);
        channel.on_internal(&ref_event, HashMap::new(), move |payload, _ref| {
            if let Some(push) = weak.upgrade() {
                push.handle_reply(payload);
            }
        });

        let weak = Arc::downgrade(self);
        self.timeout_timer.schedule(
            move || {
                if let Some(push) = weak.upgrade() {
                    push.trigger("timeout", json!({}));
                }
            },
            move |_| timeout,
        );
    }

    /// Settle the push with a synthetic reply, routed through the owning
    /// channel so the normal reply path applies.
    pub fn trigger(&self, status: &str, response: Value) {
        let ref_event = self.inner.lock().unwrap().ref_event.clone();
        let Some(ref_event) = ref_event else {
            return;
        };
        if let Some(channel) = self.channel.upgrade() {
            channel.trigger(
                &ref_event,
                json!({"status": status, "response": response}),
                None,
            );
        }
    }

    /// Unbind the temporary reply event and cancel the timeout timer.
    pub fn destroy(&self) {
        self.cancel_ref_event();
        self.timeout_timer.reset();
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn payload(&self) -> Value {
        self.inner.lock().unwrap().payload.clone()
    }

    pub fn r#ref(&self) -> Option<String> {
        self.inner.lock().unwrap().r#ref.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.inner.lock().unwrap().timeout
    }

    pub fn sent(&self) -> bool {
        self.inner.lock().unwrap().sent
    }

    pub fn rate_limited(&self) -> bool {
        self.inner.lock().unwrap().rate_limited
    }

    fn handle_reply(self: &Arc<Self>, payload: Value) {
        self.destroy();

        let status = payload.get("status").and_then(Value::as_str);
        let response = payload.get("response").cloned().unwrap_or(Value::Null);
        let Some(status) = status else {
            return;
        };

        let hooks: Vec<ReplyCallback> = {
            let mut inner = self.inner.lock().unwrap();
            inner.received = Some(status.to_string());
            inner
                .hooks
                .iter()
                .filter(|(hook_status, _)| hook_status == status)
                .map(|(_, callback)| Arc::clone(callback))
                .collect()
        };

        for hook in hooks {
            hook(response.clone());
        }
    }

    fn cancel_ref_event(&self) {
        let ref_event = self.inner.lock().unwrap().ref_event.clone();
        let Some(ref_event) = ref_event else {
            return;
        };
        if let Some(channel) = self.channel.upgrade() {
            channel.off(&ref_event, &HashMap::new());
        }
    }

    fn has_received(&self, status: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .received
            .as_deref()
            .map_or(false, |received| received == status)
    }
}
