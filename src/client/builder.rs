use super::{ClientState, ConnectionManager, RealtimeClient};
use crate::infrastructure::Timer;
use crate::types::constants::{
    default_headers, DEFAULT_EVENTS_PER_SECOND, DEFAULT_TIMEOUT, HEARTBEAT_INTERVAL,
};
use crate::types::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Connection options.
///
/// `params` and `headers` both end up as query parameters on the endpoint
/// URL (the websocket handshake has no header channel of its own here);
/// headers default to the client-info pair.
#[derive(Debug, Clone)]
pub struct RealtimeClientOptions {
    /// Caller query parameters (e.g. an `apikey` pair)
    pub params: Vec<(String, String)>,
    /// Header-derived query parameters, merged over the defaults
    pub headers: Vec<(String, String)>,
    /// Default timeout for joins and acknowledged pushes
    pub timeout: Duration,
    /// Heartbeat probe period
    pub heartbeat_interval: Duration,
    /// Ceiling for rate-limited event classes
    pub events_per_second: u32,
    /// Initial bearer credential, if any
    pub access_token: Option<String>,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            headers: Vec::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL),
            events_per_second: DEFAULT_EVENTS_PER_SECOND,
            access_token: None,
        }
    }
}

impl RealtimeClientOptions {
    /// Width of the throttle cooldown window.
    pub fn throttle_window(&self) -> Duration {
        if self.events_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(1_000 / u64::from(self.events_per_second))
        }
    }

    /// Headers merged over the defaults, caller entries winning.
    pub fn merged_headers(&self) -> Vec<(String, String)> {
        let mut merged = default_headers();
        for (key, value) in &self.headers {
            if let Some(entry) = merged.iter_mut().find(|(k, _)| k == key) {
                entry.1 = value.clone();
            } else {
                merged.push((key.clone(), value.clone()));
            }
        }
        merged
    }
}

/// Builder validating the endpoint and assembling the client.
pub struct RealtimeClientBuilder {
    endpoint: String,
    options: RealtimeClientOptions,
}

impl RealtimeClientBuilder {
    pub fn new(endpoint: impl Into<String>, options: RealtimeClientOptions) -> Result<Self> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;
        Ok(Self { endpoint, options })
    }

    pub fn build(self) -> RealtimeClient {
        let mut state = ClientState::new();
        state.access_token = self.options.access_token.clone();

        RealtimeClient {
            endpoint: self.endpoint,
            options: Arc::new(self.options),
            connection: Arc::new(ConnectionManager::new()),
            state: Arc::new(Mutex::new(state)),
            heartbeat_timer: Timer::new(),
            reconnect_timer: Timer::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RealtimeError;

    #[test]
    fn rejects_unparseable_endpoints() {
        let result = RealtimeClientBuilder::new("not a url", RealtimeClientOptions::default());
        assert!(matches!(result, Err(RealtimeError::UrlParse(_))));
    }

    #[test]
    fn throttle_window_derives_from_events_per_second() {
        let options = RealtimeClientOptions {
            events_per_second: 10,
            ..Default::default()
        };
        assert_eq!(options.throttle_window(), Duration::from_millis(100));
    }

    #[test]
    fn merged_headers_override_defaults() {
        let options = RealtimeClientOptions {
            headers: vec![("X-Client-Info".to_string(), "custom/1".to_string())],
            ..Default::default()
        };
        let merged = options.merged_headers();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].1, "custom/1");
    }
}
