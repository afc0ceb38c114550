//! Channel layer: join/leave state machines, event bindings, acknowledged
//! pushes, presence tracking and the database-change payload transform.

mod config;
mod core;
mod postgres_changes;
mod presence;
mod push;
mod state;
mod transform;

pub use config::{BroadcastConfig, ChannelJoinConfig, JoinPayload, PresenceConfig};
pub use core::{RealtimeChannel, RealtimeChannelOptions, SubscribeStatus};
pub use postgres_changes::{
    ColumnInfo, PostgresChangeData, PostgresChangeEvent, PostgresChangePayload,
    PostgresChangesFilter,
};
pub use presence::{
    Presence, PresenceChanges, PresenceMeta, PresenceState, RawPresenceDiff, RawPresenceState,
};
pub use push::Push;
pub use state::ChannelStatus;
