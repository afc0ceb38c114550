use thiserror::Error;

/// Errors surfaced by the realtime client.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// WebSocket protocol error (handshake failed, invalid frame, etc.)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The endpoint is malformed in a way that cannot be retried
    /// (e.g. a scheme that is neither `ws` nor `wss`)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `subscribe` was called more than once on the same channel instance
    #[error("tried to subscribe multiple times; 'subscribe' can only be called once per channel instance")]
    AlreadySubscribed,

    /// A push was attempted before the channel was ever subscribed
    #[error("tried to push '{event}' to '{topic}' before joining; call subscribe() before pushing events")]
    NotJoined { event: String, topic: String },

    /// Channel-level failure (server rejected the join, binding mismatch, ...)
    #[error("channel error: {0}")]
    Channel(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error (malformed endpoint)
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// An acknowledged push did not receive its reply in time
    #[error("timed out")]
    Timeout,

    /// Operation attempted while not connected to the server
    #[error("not connected")]
    NotConnected,
}

/// Convenience alias for `Result<T, RealtimeError>`.
pub type Result<T> = std::result::Result<T, RealtimeError>;
