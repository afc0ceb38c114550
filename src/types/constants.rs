/// Phoenix protocol event strings (magic strings layer)
pub mod phoenix_events {
    pub const CLOSE: &str = "phx_close";
    pub const ERROR: &str = "phx_error";
    pub const JOIN: &str = "phx_join";
    pub const REPLY: &str = "phx_reply";
    pub const LEAVE: &str = "phx_leave";
    pub const HEARTBEAT: &str = "heartbeat";

    /// Lifecycle events filtered by join reference on dispatch.
    pub const LIFECYCLE: [&str; 4] = [CLOSE, ERROR, LEAVE, JOIN];
}

/// Phoenix reserved control topic (heartbeats)
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Channel event strings (magic strings layer)
pub mod channel_events {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const BROADCAST: &str = "broadcast";
    pub const PRESENCE: &str = "presence";
    pub const PRESENCE_STATE: &str = "presence_state";
    pub const PRESENCE_DIFF: &str = "presence_diff";

    /// Event classes subject to the outbound throttle.
    pub const RATE_LIMITED: [&str; 3] = [BROADCAST, PRESENCE, POSTGRES_CHANGES];
}

/// WebSocket transport path segment
pub const TRANSPORT_WEBSOCKET: &str = "websocket";

/// Protocol version
pub const VSN: &str = "1.0.0";

/// Client version reported in default headers
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default push/join timeout (milliseconds)
pub const DEFAULT_TIMEOUT: u64 = 10_000;

/// Default heartbeat interval (milliseconds)
pub const HEARTBEAT_INTERVAL: u64 = 25_000;

/// Default events-per-second ceiling for rate-limited event classes
pub const DEFAULT_EVENTS_PER_SECOND: u32 = 10;

/// Reconnect backoff table (milliseconds), clamped to the last entry
pub const RECONNECT_INTERVALS: [u64; 4] = [1_000, 2_000, 5_000, 10_000];

/// Default headers, appended to the endpoint URL as query parameters
pub fn default_headers() -> Vec<(String, String)> {
    vec![(
        "X-Client-Info".to_string(),
        format!("realtime-channels/{CLIENT_VERSION}"),
    )]
}

/// Postgres column type names recognized by the payload transform.
///
/// Immutable lookup data; the transform branches on a handful of these and
/// passes every other type through untouched.
pub mod postgres_types {
    pub const ABSTIME: &str = "abstime";
    pub const BOOL: &str = "bool";
    pub const DATE: &str = "date";
    pub const DATERANGE: &str = "daterange";
    pub const FLOAT4: &str = "float4";
    pub const FLOAT8: &str = "float8";
    pub const INT2: &str = "int2";
    pub const INT4: &str = "int4";
    pub const INT4RANGE: &str = "int4range";
    pub const INT8: &str = "int8";
    pub const INT8RANGE: &str = "int8range";
    pub const JSON: &str = "json";
    pub const JSONB: &str = "jsonb";
    pub const MONEY: &str = "money";
    pub const NUMERIC: &str = "numeric";
    pub const OID: &str = "oid";
    pub const RELTIME: &str = "reltime";
    pub const TEXT: &str = "text";
    pub const TIME: &str = "time";
    pub const TIMESTAMP: &str = "timestamp";
    pub const TIMESTAMPTZ: &str = "timestamptz";
    pub const TIMETZ: &str = "timetz";
    pub const TSRANGE: &str = "tsrange";
    pub const TSTZRANGE: &str = "tstzrange";
}
