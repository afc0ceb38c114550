use crate::types::constants::{channel_events, phoenix_events};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Type-safe channel events
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelEvent {
    /// PostgreSQL database changes
    PostgresChanges,

    /// User-defined broadcast event
    Broadcast,

    /// Presence tracking event
    Presence,

    /// Full presence state snapshot
    PresenceState,

    /// Incremental presence joins/leaves
    PresenceDiff,

    /// Live access token refresh for a joined channel
    AccessToken,

    /// Protocol events (phx_*, heartbeat)
    System(SystemEvent),

    /// Anything else, including synthetic `chan_reply_<ref>` events
    Custom(String),
}

impl ChannelEvent {
    /// Parse a wire string into a ChannelEvent
    pub fn parse(s: &str) -> Self {
        match s {
            channel_events::POSTGRES_CHANGES => Self::PostgresChanges,
            channel_events::BROADCAST => Self::Broadcast,
            channel_events::PRESENCE => Self::Presence,
            channel_events::PRESENCE_STATE => Self::PresenceState,
            channel_events::PRESENCE_DIFF => Self::PresenceDiff,
            channel_events::ACCESS_TOKEN => Self::AccessToken,
            _ if s.starts_with("phx_") || s == phoenix_events::HEARTBEAT => {
                Self::System(SystemEvent::parse(s))
            }
            _ => Self::Custom(s.to_string()),
        }
    }

    /// Wire string representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::PostgresChanges => channel_events::POSTGRES_CHANGES,
            Self::Broadcast => channel_events::BROADCAST,
            Self::Presence => channel_events::PRESENCE,
            Self::PresenceState => channel_events::PRESENCE_STATE,
            Self::PresenceDiff => channel_events::PRESENCE_DIFF,
            Self::AccessToken => channel_events::ACCESS_TOKEN,
            Self::System(sys) => sys.as_str(),
            Self::Custom(s) => s,
        }
    }
}

impl From<&str> for ChannelEvent {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for ChannelEvent {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// The wire format is a bare string, so serde goes through as_str/parse
// rather than a derived tagged representation.
impl Serialize for ChannelEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ChannelEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Phoenix protocol events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemEvent {
    /// Join channel
    Join,

    /// Leave channel
    Leave,

    /// Reply to a pushed message
    Reply,

    /// Channel closed
    Close,

    /// Channel-level error
    Error,

    /// Liveness probe
    Heartbeat,
}

impl SystemEvent {
    pub fn parse(s: &str) -> Self {
        match s {
            phoenix_events::JOIN => Self::Join,
            phoenix_events::LEAVE => Self::Leave,
            phoenix_events::REPLY => Self::Reply,
            phoenix_events::CLOSE => Self::Close,
            phoenix_events::HEARTBEAT => Self::Heartbeat,
            _ => Self::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => phoenix_events::JOIN,
            Self::Leave => phoenix_events::LEAVE,
            Self::Reply => phoenix_events::REPLY,
            Self::Close => phoenix_events::CLOSE,
            Self::Error => phoenix_events::ERROR,
            Self::Heartbeat => phoenix_events::HEARTBEAT,
        }
    }
}
