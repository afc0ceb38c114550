use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broadcast behavior requested at join time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Deliver the client its own broadcasts
    #[serde(rename = "self")]
    pub self_: bool,
    /// Ask the server to acknowledge broadcast receipt
    pub ack: bool,
}

/// Presence behavior requested at join time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Key grouping presences for this client; empty lets the server pick
    pub key: String,
}

/// The `config` object of the join payload: defaults merged with the
/// caller-supplied channel options, plus whatever postgres-change filters
/// are bound at subscribe time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelJoinConfig {
    pub broadcast: BroadcastConfig,
    pub presence: PresenceConfig,
    #[serde(rename = "private")]
    pub is_private: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub postgres_changes: Vec<Value>,
}

/// Full join payload sent with `phx_join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPayload {
    pub config: ChannelJoinConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}
